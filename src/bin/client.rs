//! A small command-line client for the featmill daemon.
//!
//! Sends one JSON command (from the argument or stdin) and prints every
//! reply frame. Float payloads are rendered as JSON arrays.

use std::io::Read;
use std::net::TcpStream;

use anyhow::Context;
use clap::Parser;

use featmill::protocol::wire;

#[derive(Parser, Debug)]
#[command(name = "featmill-client", about = "Send a command to a featmill daemon")]
struct Args {
    /// The JSON command; read from stdin when omitted.
    command: Option<String>,

    #[arg(long, default_value_t = 1708)]
    port: u16,

    /// Interpret the reply payload as a float column.
    #[arg(long)]
    floats: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let command = match args.command {
        Some(command) => command,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let value: serde_json::Value =
        serde_json::from_str(&command).context("the command is not valid JSON")?;

    let mut stream = TcpStream::connect(("127.0.0.1", args.port))
        .with_context(|| format!("cannot connect to 127.0.0.1:{}", args.port))?;
    wire::write_json(&mut stream, &value).context("cannot send the command")?;

    let reply = wire::read_string(&mut stream, usize::MAX >> 1)
        .context("no reply from the daemon")?;
    println!("{reply}");
    if !reply.starts_with("Success!") {
        std::process::exit(1);
    }

    // Drain any payload frames until the daemon stops sending.
    stream
        .set_read_timeout(Some(std::time::Duration::from_millis(200)))
        .ok();
    loop {
        if args.floats {
            match wire::read_floats(&mut stream, usize::MAX >> 1) {
                Ok(values) => println!("{}", serde_json::to_string(&values)?),
                Err(_) => break,
            }
        } else {
            match wire::read_string(&mut stream, usize::MAX >> 1) {
                Ok(payload) => println!("{payload}"),
                Err(_) => break,
            }
        }
    }
    Ok(())
}
