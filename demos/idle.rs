extern crate imap_engine;

use std::env;
use std::sync::mpsc;
use std::time::Duration;

use imap_engine::commands::{IdleCommand, LoginCommand, LogoutCommand, SelectCommand};
use imap_engine::{shared, DebugMode, ImapAsyncClient, SessionConfig};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("need three arguments: imap-server login password");
    } else {
        idle_inbox(&args[1], &args[2], &args[3]).unwrap();
    }
}

fn idle_inbox(server: &str, login: &str, password: &str) -> imap_engine::Result<()> {
    let mut config = SessionConfig::new(server, 993);
    config.debug(DebugMode::DebugOn);
    let session = ImapAsyncClient::new().create_session(&config).get()?;

    let login = session.execute(shared(LoginCommand::new(login, password)))?.get()?;
    if !login.last().map_or(false, |r| r.is_ok()) {
        println!("login refused");
        return Ok(());
    }

    // compression is optional; servers without COMPRESS=DEFLATE answer NO or BAD
    let compress = session.start_compression()?.get()?;
    println!("compression: {}", compress.last().map_or(false, |r| r.is_ok()));

    session.execute(shared(SelectCommand::select("INBOX")))?.get()?;

    let (tx, rx) = mpsc::channel();
    let idle = shared(IdleCommand::new(tx));
    session.execute(idle.clone())?;
    println!("waiting for a mailbox update");
    match rx.recv_timeout(Duration::from_secs(300)) {
        Ok(update) => println!("got update: {}", update),
        Err(_) => println!("no update within five minutes"),
    }
    let responses = session.terminate(&idle)?.get()?;
    println!("idle ended after {} responses", responses.len());

    session.execute(shared(LogoutCommand::new()))?.get()?;
    session.close().get()?;
    Ok(())
}
