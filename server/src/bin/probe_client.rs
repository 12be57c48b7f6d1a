//! Scripted probe client for manual server testing.
//!
//! Connects, performs the handshake, then either walks a loop around the
//! grid (roam mode) or plays through a fixed choice list (battle mode),
//! printing every frame the server sends.

use shared::read_frame;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:3012".to_string());
    let name = args.next().unwrap_or_else(|| "probe".to_string());
    let mode = args.next().unwrap_or_else(|| "2".to_string());

    let stream = TcpStream::connect(&addr).await?;
    println!("Connected to {} as {} (mode {})", addr, name, mode);
    let (mut read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(payload) => println!("{}", payload),
                Err(_) => {
                    println!("server closed the connection");
                    break;
                }
            }
        }
    });

    write_half
        .write_all(format!("{} {}\n", name, mode).as_bytes())
        .await?;

    if mode == "1" {
        // Deploy roster slots in order, surrendering if we run out.
        for choice in ["1", "2", "3", "-1"] {
            sleep(Duration::from_secs(3)).await;
            write_half.write_all(format!("{}\n", choice).as_bytes()).await?;
        }
        sleep(Duration::from_secs(3)).await;
    } else {
        for step in ["up", "right", "down", "left"].iter().cycle().take(12) {
            sleep(Duration::from_secs(1)).await;
            write_half.write_all(format!("{}\n", step).as_bytes()).await?;
        }
        write_half.write_all(b"leave\n").await?;
        sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}
