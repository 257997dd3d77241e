use anyhow::Result;
use sift_index::SearchResults;

use crate::commands::open_core;
use crate::ui;

pub async fn run(account: &str, query: &str, text: bool, limit: Option<usize>, json: bool) -> Result<()> {
    let core = open_core().await?;
    let results = if text {
        core.text_search(account, query, limit).await?
    } else {
        core.search(account, query, limit).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&as_json(&results))?);
        return Ok(());
    }

    if results.is_empty() {
        ui::info("No matches.");
        return Ok(());
    }

    for hit in &results.hits {
        let doc = &hit.document;
        println!(
            "{:>6.3}  {}  {}",
            hit.score,
            doc.sent_at.format("%Y-%m-%d"),
            doc.title
        );
        println!("        {}", ui::dim(&doc.from));
    }
    println!();
    ui::info(&ui::dim(&format!(
        "{} of {} matches in {:.1?}",
        results.hits.len(),
        results.count,
        results.elapsed
    )));
    Ok(())
}

fn as_json(results: &SearchResults) -> serde_json::Value {
    let hits: Vec<serde_json::Value> = results
        .hits
        .iter()
        .map(|hit| {
            serde_json::json!({
                "id": hit.id,
                "score": hit.score,
                "title": hit.document.title,
                "from": hit.document.from,
                "to": hit.document.to,
                "sentAt": hit.document.sent_at.to_rfc3339(),
                "threadId": hit.document.thread_id,
                "snippet": hit.document.raw_body,
            })
        })
        .collect();
    serde_json::json!({
        "count": results.count,
        "elapsedMs": results.elapsed.as_millis() as u64,
        "hits": hits,
    })
}
