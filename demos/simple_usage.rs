use log_tail::{Config, tail_file};
use std::io::Write;
use std::time::Duration;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    std::fs::write(&path, "2024-01-15 10:30:00 INFO Starting application\n")?;

    // Follow the log file and print each line as it arrives
    let mut tail = tail_file(&path, Config::follow()).await?;
    println!("Tailing {}...", path.display());

    let writer_path = path.clone();
    tokio::spawn(async move {
        for i in 1..=3 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if let Ok(mut file) = std::fs::OpenOptions::new().append(true).open(&writer_path) {
                let _ = writeln!(file, "2024-01-15 10:30:0{} INFO Request {} handled", i, i);
            }
        }
    });

    let mut count = 0;
    while let Some(line) = tail.next().await {
        println!("  [{}] @{}: {}", count + 1, tail.tell(), line.text);

        count += 1;
        if count >= 4 {
            break;
        }
    }

    tail.stop().await?;
    Ok(())
}
