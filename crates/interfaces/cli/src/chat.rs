use std::io::{self, Write};

use anyhow::Result;

use opsmate_exec::Connector;
use opsmate_llm::ChatClient;
use opsmate_runtime::Pipeline;

pub(crate) async fn run_line_session<C, K>(
    pipeline: &Pipeline<C, K>,
    mut conversation: Option<String>,
) -> Result<()>
where
    C: ChatClient,
    K: Connector,
{
    println!("opsmate interactive mode");
    println!("ask about disk, RAM, CPU, uptime, nginx logs or workspace files");
    println!("commands: /new, /id, /help, /exit");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let bytes = stdin.read_line(&mut line)?;
        if bytes == 0 {
            println!("session closed");
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => {
                println!("session closed");
                break;
            }
            "/help" => {
                println!("/new   -- start a new conversation");
                println!("/id    -- show the current conversation id");
                println!("/exit");
                continue;
            }
            "/new" => {
                conversation = None;
                println!("started a new conversation");
                continue;
            }
            "/id" => {
                println!("{}", conversation.as_deref().unwrap_or("(none yet)"));
                continue;
            }
            _ => {}
        }

        match pipeline.handle_turn(conversation.as_deref(), line).await {
            Ok(reply) => {
                if conversation.as_deref() != Some(reply.conversation_id.as_str()) {
                    println!("[{}]", reply.title);
                }
                conversation = Some(reply.conversation_id);
                println!("{}\n", reply.text);
            }
            Err(err) => {
                tracing::warn!(conversation = ?conversation, "turn failed: {err:#}");
                eprintln!("turn failed: {err:#}");
            }
        }
    }
    Ok(())
}
