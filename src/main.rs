use log_tail::{Config, tail_file};
use std::env;
use std::process;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} [-F] [--poll] <file_path>", program);
    process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("log-tail");

    let mut config = Config::follow();
    let mut file_path = None;
    for arg in &args[1..] {
        match arg.as_str() {
            "-F" => config.reopen = true,
            "--poll" => config.poll = true,
            _ if arg.starts_with('-') || file_path.is_some() => usage(program),
            _ => file_path = Some(arg.clone()),
        }
    }
    let Some(file_path) = file_path else {
        usage(program)
    };

    let mut tail = match tail_file(&file_path, config).await {
        Ok(tail) => tail,
        Err(e) => {
            eprintln!("Error setting up tail: {}", e);
            process::exit(1);
        }
    };

    loop {
        tokio::select! {
            line = tail.next() => match line {
                Some(line) => println!("{}", line.text),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted, stopping");
                break;
            }
        }
    }

    let result = tail.stop().await;
    tail.cleanup();
    if let Err(e) = result {
        eprintln!("Error tailing file: {}", e);
        process::exit(1);
    }
}
