//! # Camera command console
//!
//! Interactive line editor sending commands to the camera's TCP command channel and printing the
//! replies.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use color_eyre::{eyre::WrapErr, Result};
use comms_if::cmd::{extract_lexeme, LexemeKind};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use structopt::StructOpt;

const PROMPT: &str = "Cam $ ";
const HISTORY_PATH: &str = "data/history.txt";

/// How long to wait for the first reply byte. Unknown commands get no reply at all.
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Once a reply has started, how long a pause ends it.
const REPLY_GAP: Duration = Duration::from_millis(50);

#[derive(Debug, StructOpt)]
#[structopt(name = "command_line_cam", about = "Send commands to a running cam_exec")]
struct Opts {
    /// Address of the camera command channel.
    #[structopt(long, default_value = "127.0.0.1:5001")]
    endpoint: String,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::from_args();

    let mut stream = TcpStream::connect(&opts.endpoint)
        .wrap_err_with(|| format!("Could not connect to {}", opts.endpoint))?;
    println!("Connected to {}, type help for the command list", opts.endpoint);

    let mut rl = DefaultEditor::new().wrap_err("Could not start the line editor")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());

                if !check_line(&line) {
                    continue;
                }

                stream
                    .write_all(format!("{}\r\n", line).as_bytes())
                    .wrap_err("Sending the command failed")?;

                match read_reply(&mut stream).wrap_err("Reading the reply failed")? {
                    Some(reply) => print!("{}", reply),
                    None => println!("(no reply, unknown command?)"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Unhandled Error: {:?}", err);
                break;
            }
        }
    }

    println!("Exiting...");
    if let Err(e) = rl.save_history(HISTORY_PATH) {
        println!("Could not save the history: {}", e);
    }

    Ok(())
}

/// Catch lines the camera would silently ignore.
fn check_line(line: &str) -> bool {
    let (_, mnemonic) = extract_lexeme(line, 0, line.len());

    match mnemonic.kind {
        LexemeKind::Word => true,
        LexemeKind::Empty => false,
        LexemeKind::Quoted | LexemeKind::Unterminated => {
            println!("Command names cannot be quoted");
            false
        }
    }
}

/// Read whatever the camera sends back, `None` if nothing arrived in time.
fn read_reply(stream: &mut TcpStream) -> io::Result<Option<String>> {
    let mut reply = Vec::new();
    let mut buf = [0u8; 512];
    let start = Instant::now();

    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;

    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "camera closed the connection",
                ))
            }
            Ok(n) => {
                reply.extend_from_slice(&buf[..n]);
                stream.set_read_timeout(Some(REPLY_GAP))?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e),
        }

        if start.elapsed() > REPLY_TIMEOUT * 4 {
            break;
        }
    }

    if reply.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&reply).into_owned()))
    }
}
