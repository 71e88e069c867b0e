use log_tail::{Config, SeekInfo, Tail, tail_file};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Log Tail Comprehensive Example ===\n");

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    std::fs::write(
        &path,
        "2024-01-15 10:30:00 INFO Starting application\n\
         2024-01-15 10:30:01 DEBUG Loading configuration\n\
         2024-01-15 10:30:02 WARN Cache miss ratio high\n\
         2024-01-15 10:30:03 ERROR Failed to reach database\n\
         2024-01-15 10:30:04 INFO Retrying connection\n",
    )?;

    // Example 1: Read the file once, like `cat`
    println!("1. Read to end - no following:");
    read_to_end(&path).await?;

    println!("\n{}\n", "=".repeat(50));

    // Example 2: Start at the end, like `tail -f -n 0`
    println!("2. Start at end - only new lines:");
    start_at_end(&path).await?;

    println!("\n{}\n", "=".repeat(50));

    // Example 3: Survive log rotation, like `tail -F`
    println!("3. Rotation - reopen the recreated file:");
    rotation(&path).await?;

    Ok(())
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{}", line)
}

async fn next_within(tail: &mut Tail, timeout: Duration) -> Option<String> {
    match tokio::time::timeout(timeout, tail.next()).await {
        Ok(Some(line)) => Some(line.text),
        Ok(None) => {
            println!("  ℹ️  Tail ended");
            None
        }
        Err(_) => {
            println!("  ⏰ Timeout - no new content in file");
            None
        }
    }
}

async fn read_to_end(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let tail = tail_file(path, Config::default()).await?;
    let lines: Vec<_> = tail.collect().await;

    // Example: Count lines by log level
    let mut counts = std::collections::BTreeMap::new();
    for line in &lines {
        for level in ["INFO", "DEBUG", "WARN", "ERROR"] {
            if line.text.contains(level) {
                *counts.entry(level).or_insert(0) += 1;
            }
        }
    }

    println!("  📊 Read {} lines", lines.len());
    for (level, count) in counts {
        println!("    {}: {} lines", level, count);
    }

    Ok(())
}

async fn start_at_end(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        location: Some(SeekInfo::end()),
        ..Config::follow()
    };
    let mut tail = tail_file(path, config).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    append(path, "2024-01-15 10:30:05 INFO Connected")?;

    if let Some(text) = next_within(&mut tail, Duration::from_secs(2)).await {
        println!("  📦 New line: {}", text);
    }

    tail.stop().await?;
    Ok(())
}

async fn rotation(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        location: Some(SeekInfo::end()),
        ..Config::follow_retry()
    };
    let mut tail = tail_file(path, config).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::rename(path, path.with_extension("log.1"))?;
    std::fs::write(path, "2024-01-15 10:31:00 INFO Log rotated\n")?;

    if let Some(text) = next_within(&mut tail, Duration::from_secs(2)).await {
        println!("  🔄 First line after rotation: {}", text);
    }

    tail.stop().await?;
    tail.cleanup();
    Ok(())
}
