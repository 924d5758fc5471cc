use std::io::{self, IsTerminal, Write};

use anyhow::{Result, bail};

use opsmate_runtime::{ConversationMeta, ConversationStore, ToolRun, TurnRecord};

pub(crate) fn run_list(store: &ConversationStore) -> Result<()> {
    let metas = store.list()?;
    if metas.is_empty() {
        println!("no conversations yet");
        return Ok(());
    }
    println!("── conversations ────────────────────────────────────");
    for meta in &metas {
        println!("{}", list_line(meta));
    }
    println!("  ({} total)", metas.len());
    Ok(())
}

pub(crate) fn run_show(store: &ConversationStore, id: &str) -> Result<()> {
    let Some(meta) = store.get(id)? else {
        bail!("conversation {id} not found");
    };
    let turns = store.load_turns(id)?;
    let runs = store.tool_runs(id)?;
    print!("{}", render_transcript(&meta, &turns, &runs));
    Ok(())
}

/// Titles longer than this are cut on rename.
pub(crate) const TITLE_MAX_CHARS: usize = 200;

pub(crate) fn run_rename(store: &ConversationStore, id: &str, title: &str) -> Result<()> {
    let title = clean_title(title);
    if title.is_empty() {
        bail!("title must not be empty");
    }
    if store.get(id)?.is_none() {
        bail!("conversation {id} not found");
    }
    let meta = store.set_title(id, &title)?;
    tracing::debug!(conversation = %id, "renamed conversation");
    println!("renamed {id} to '{}'", meta.title);
    Ok(())
}

fn clean_title(title: &str) -> String {
    title.trim().chars().take(TITLE_MAX_CHARS).collect::<String>().trim_end().to_string()
}

pub(crate) fn run_delete(store: &ConversationStore, id: &str, yes: bool) -> Result<()> {
    let Some(meta) = store.get(id)? else {
        bail!("conversation {id} not found");
    };

    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing to delete in non-interactive mode without --yes");
        }
        print!("Delete conversation '{}'? Type 'yes' to continue: ", meta.title);
        io::stdout().flush()?;
        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != "yes" {
            println!("delete cancelled");
            return Ok(());
        }
    }

    store.delete(id)?;
    tracing::debug!(conversation = %id, "deleted conversation");
    println!("deleted {id}");
    Ok(())
}

fn list_line(meta: &ConversationMeta) -> String {
    format!(
        "  {}  {}  {}",
        meta.id,
        meta.updated_at.format("%Y-%m-%d %H:%M"),
        meta.title
    )
}

fn render_transcript(meta: &ConversationMeta, turns: &[TurnRecord], runs: &[ToolRun]) -> String {
    let mut out = format!("── {} ({}) ──\n", meta.title, meta.id);
    if let Some(summary) = &meta.summary {
        out.push_str(&format!("summary:\n{summary}\n\n"));
    }
    for turn in turns {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            turn.timestamp.format("%H:%M:%S"),
            turn.role.as_str(),
            turn.content
        ));
    }
    if !runs.is_empty() {
        out.push_str("\ntool runs:\n");
        for run in runs {
            out.push_str(&format!(
                "  {} {} [{}]\n",
                run.created_at.format("%H:%M:%S"),
                run.tool_name,
                run.status
            ));
        }
    }
    out
}
