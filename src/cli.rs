use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::time::{SystemTime, UNIX_EPOCH};
use clap::Parser;
use serde_json::{json, Value};
use parrot::parser::{self, Command, MessageArgs};
use parrot::server::{OP_ADMIT, OP_CHECK, OP_PROCESS, OP_SAVE, OP_STATS, STATUS_OK};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Interactive client for the parrot dedup server", long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9100")]
    addr: String,
}

fn main() {
    let args = Args::parse();
    print_banner();

    match TcpStream::connect(&args.addr) {
        Ok(_) => println!("[\u{2713}] Connected to parrot at {}!", args.addr),
        Err(_) => {
            println!("[\u{2717}] Could not connect to server at {}.", args.addr);
            println!("    Make sure to run 'cargo run --release --bin parrot' in another terminal.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("parrot> ");
        if io::stdout().flush().is_err() {
            break;
        }
        buffer.clear();

        match stdin.lock().read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&args.addr, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.contains('\'') && !buffer.contains('"') {
                    println!("    \u{2139}\u{fe0f}  Hint: message text goes in double quotes: CHECK \"some text\"");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   Parrot CLI - Semantic Duplicate Filter");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. CHECK:   CHECK \"text\" [ID 'id'] [CHAT 'chat']   (verdict only)");
    println!("2. ADMIT:   ADMIT \"text\" [ID 'id'] [CHAT 'chat']   (add to cache)");
    println!("3. PROCESS: PROCESS \"text\" [ID 'id'] [CHAT 'chat'] (check, admit if new)");
    println!("4. STATS:   STATS");
    println!("5. SAVE:    SAVE                                  (write snapshot now)");
    println!("6. EXIT:    Quit\n");
}

fn execute_command(addr: &str, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => { print_help(); Ok(()) },
        Command::Check(args) => {
            let verdict = request(addr, OP_CHECK, &envelope(&args))?;
            print_verdict(&verdict);
            Ok(())
        },
        Command::Admit(args) => {
            let reply = request(addr, OP_ADMIT, &envelope(&args))?;
            if reply["admitted"].as_bool().unwrap_or(false) {
                println!("[\u{2713} OK] Admitted.");
            } else {
                println!("[\u{2717}] Not admitted (too short or already cached).");
            }
            Ok(())
        },
        Command::Process(args) => {
            let reply = request(addr, OP_PROCESS, &envelope(&args))?;
            print_verdict(&reply["outcome"]["verdict"]);
            if reply["outcome"]["admitted"].as_bool().unwrap_or(false) {
                println!("    Admitted to cache.");
            }
            Ok(())
        },
        Command::Stats => {
            let stats = request(addr, OP_STATS, &[])?;
            println!("{}", serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?);
            Ok(())
        },
        Command::Save => {
            let reply = request(addr, OP_SAVE, &[])?;
            match reply["bytes"].as_u64() {
                Some(bytes) => println!("[\u{2713} OK] Snapshot written ({} bytes).", bytes),
                None => println!("[\u{2139}\u{fe0f}] Persistence is disabled on the server."),
            }
            Ok(())
        },
        Command::Exit => Ok(()),
    }
}

fn envelope(args: &MessageArgs) -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut data = json!({ "text": args.text, "chat_id": args.chat_id.clone().unwrap_or_default() });
    if let Some(id) = &args.id {
        data["message_id"] = json!(id);
    }
    json!({ "type": "cli.message", "timestamp": now, "source": "parrot-cli", "data": data })
        .to_string()
        .into_bytes()
}

fn print_verdict(v: &Value) {
    let similarity = v["similarity"].as_f64().unwrap_or(0.0);
    if v["is_duplicate"].as_bool().unwrap_or(false) {
        println!(
            "[\u{1f99c} DUPLICATE] similarity {:.4} to '{}'",
            similarity,
            v["matched"]["id"].as_str().unwrap_or("?")
        );
        if let Some(text) = v["matched"]["text"].as_str() {
            println!("    Original: \"{}\"", text);
        }
    } else {
        println!(
            "[\u{2713} NEW] best similarity {:.4} ({} neighbours examined)",
            similarity,
            v["neighbors_examined"].as_u64().unwrap_or(0)
        );
    }
}

// --- NETWORK ---

fn request(addr: &str, op: u8, body: &[u8]) -> Result<Value, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| e.to_string())?;

    stream.write_all(&[op]).map_err(|e| e.to_string())?;
    stream.write_all(&(body.len() as u32).to_le_bytes()).map_err(|e| e.to_string())?;
    stream.write_all(body).map_err(|e| e.to_string())?;

    let mut header = [0u8; 5];
    stream.read_exact(&mut header).map_err(|e| format!("no response: {}", e))?;
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).map_err(|e| e.to_string())?;

    let reply: Value = serde_json::from_slice(&payload).map_err(|e| e.to_string())?;
    if header[0] != STATUS_OK {
        return Err(reply["error"].as_str().unwrap_or("Server Rejected Request").to_string());
    }
    Ok(reply)
}
