//! Terminal output for the CLI.

use std::{collections::HashMap, time::Duration};

use common::{
    data::{DocumentRecord, DocumentStatus, UploadEntry},
    payloads::DocumentStats,
};
use kdam::{
    term::Colorizer,
    tqdm, BarExt, Column, RichProgress, Spinner,
};
use tokio::{
    select,
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::controller::Snapshot;

fn status_text(entry: &UploadEntry) -> String {
    match entry.status() {
        DocumentStatus::Uploading => "uploading".colorize("bold blue"),
        DocumentStatus::Processing => "processing".colorize("yellow"),
        DocumentStatus::Completed => "completed".colorize("green"),
        DocumentStatus::Error => format!("error: {}", entry.error().unwrap_or_default()).colorize("red"),
    }
}

fn new_bar(entry: &UploadEntry, position: usize) -> RichProgress {
    RichProgress::new(
        tqdm!(total = 100, position = position as u16, unit = "%"),
        vec![
            Column::Spinner(Spinner::new(
                &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
                80.0,
                1.0,
            )),
            Column::Text(format!("[bold blue]{}", entry.file_name)),
            Column::Animation,
            Column::Percentage(0),
            Column::Text("•".to_owned()),
            Column::Text(status_text(entry)),
        ],
    )
}

/// One bar per entry on a terminal; one line per status change otherwise.
/// Runs until `token` is cancelled, then draws the final state.
pub async fn render(mut snapshots: watch::Receiver<Snapshot>, token: CancellationToken, tty: bool) {
    let mut timer = interval(Duration::from_millis(100));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut bars: HashMap<String, RichProgress> = HashMap::new();
    let mut seen: HashMap<String, DocumentStatus> = HashMap::new();
    loop {
        let done = select! {
            _ = timer.tick() => false,
            _ = token.cancelled() => true,
        };
        let snap = snapshots.borrow_and_update().clone();
        if tty {
            draw_bars(&mut bars, &snap);
        } else {
            print_changes(&mut seen, &snap);
        }
        if done {
            break;
        }
    }
    for (_, mut bar) in bars {
        let _ = bar.refresh();
    }
    if tty {
        eprintln!();
    }
}

fn draw_bars(bars: &mut HashMap<String, RichProgress>, snap: &Snapshot) {
    for (position, entry) in snap.entries.iter().enumerate() {
        let bar = bars
            .entry(entry.id.clone())
            .or_insert_with(|| new_bar(entry, position));
        bar.columns.truncate(5);
        bar.columns.push(Column::Text(status_text(entry)));
        let _ = bar.update_to(entry.progress() as usize);
    }
}

fn print_changes(seen: &mut HashMap<String, DocumentStatus>, snap: &Snapshot) {
    for entry in &snap.entries {
        if seen.get(&entry.id) == Some(&entry.status()) {
            continue;
        }
        seen.insert(entry.id.clone(), entry.status());
        match entry.error() {
            Some(error) => eprintln!("{} entered status {}: {error}", entry.file_name, entry.status()),
            None => eprintln!("{} entered status {}.", entry.file_name, entry.status()),
        }
    }
}

pub fn print_entries(entries: &[UploadEntry]) {
    for entry in entries {
        println!(
            "{}  {:<32} {:>10}  {:<10} {:>3}%  {}",
            entry.id,
            entry.file_name,
            entry.file_size,
            entry.status(),
            entry.progress(),
            entry.document_id().unwrap_or("-"),
        );
        if let Some(error) = entry.error() {
            println!("    {error}");
        }
    }
}

pub fn print_documents(documents: &[DocumentRecord]) {
    for doc in documents {
        println!(
            "{}  {:<32} {:>10}  {}",
            doc.id, doc.name, doc.file_size, doc.status
        );
        if let Some(error) = &doc.error_message {
            println!("    {error}");
        }
    }
}

pub fn print_stats(stats: &DocumentStats) {
    println!(
        "{} document(s), {} MB: {} completed, {} processing, {} failed",
        stats.total_documents,
        stats.total_size_mb,
        stats.completed_documents,
        stats.processing_documents,
        stats.error_documents,
    );
}
