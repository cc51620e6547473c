//! Demo client for backup-server
//!
//! Reads `host:port` from the server info file and a list of local file names
//! from the backup info file, then walks through list, backup, restore and
//! delete requests under a random user id.

use backup_core::{BackupClient, Reply, StatusCode};
use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(about = "Exercise a backup server with a fixed request sequence")]
struct Args {
    #[arg(long, default_value = "server.info")]
    server_info: PathBuf,

    #[arg(long, default_value = "backup.info")]
    backup_info: PathBuf,

    /// Defaults to a random id
    #[arg(long)]
    user_id: Option<u32>,
}

type AnyError = Box<dyn Error + Send + Sync>;

fn read_server_addr(path: &Path) -> Result<String, AnyError> {
    let raw = std::fs::read_to_string(path)?;
    let line = raw.lines().next().unwrap_or_default().trim();
    let (host, port) = line
        .split_once(':')
        .ok_or_else(|| format!("{}: expected host:port, got {line:?}", path.display()))?;
    let port: u16 = port.trim().parse()?;
    Ok(format!("{}:{port}", host.trim()))
}

fn read_backup_list(path: &Path) -> Result<Vec<String>, AnyError> {
    let raw = std::fs::read_to_string(path)?;
    let names: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if names.len() < 2 {
        return Err(format!("{}: need at least two file names", path.display()).into());
    }
    Ok(names)
}

fn report(reply: &Reply, expected: StatusCode) {
    let status = match reply.status_code() {
        Some(code) => code.to_string(),
        None => format!("Unknown ({})", reply.status),
    };
    if reply.status_code() == Some(expected) {
        println!("[Client] Request succeeded, status = {status}");
    } else {
        println!("[Client] Request failed, status = {status}");
    }
}

async fn list(client: &BackupClient<String>, user_id: u32) -> Result<(), AnyError> {
    println!("[Client] Requesting server to generate files list...");
    let reply = client.list(user_id).await?;
    report(&reply, StatusCode::ListOk);
    if let Some(names) = reply.file_list() {
        println!("[Client] Files on server:");
        for name in names {
            println!("         {name}");
        }
    }
    Ok(())
}

async fn backup(client: &BackupClient<String>, user_id: u32, name: &str) -> Result<(), AnyError> {
    println!("[Client] Requesting server to backup file: {name}");
    let reply = client.backup_file(user_id, Path::new(name)).await?;
    report(&reply, StatusCode::BackupOk);
    Ok(())
}

async fn restore(client: &BackupClient<String>, user_id: u32, name: &str) -> Result<(), AnyError> {
    println!("[Client] Requesting server to restore file: {name}");
    let reply = client.restore(user_id, name).await?;
    report(&reply, StatusCode::RestoreOk);
    if let Some(data) = &reply.payload {
        // Never clobber the local original.
        let target = if Path::new(name).is_file() { "tmp" } else { name };
        tokio::fs::write(target, data).await?;
        println!("[Client] Restored {} bytes into {target}", data.len());
    }
    Ok(())
}

async fn delete(client: &BackupClient<String>, user_id: u32, name: &str) -> Result<(), AnyError> {
    println!("[Client] Requesting server to delete file: {name}");
    let reply = client.delete(user_id, name).await?;
    report(&reply, StatusCode::DeleteOk);
    Ok(())
}

async fn run(args: Args) -> Result<(), AnyError> {
    let user_id = args.user_id.unwrap_or_else(rand::random);
    println!("[Client] user_id = {user_id}");

    let addr = read_server_addr(&args.server_info)?;
    println!("[Client] Server info: {addr}");

    let files = read_backup_list(&args.backup_info)?;
    println!("[Client] Backup info:");
    for name in &files {
        println!("         {name}");
    }

    let client = BackupClient::new(addr);
    let (first, second) = (&files[0], &files[1]);

    list(&client, user_id).await?;
    backup(&client, user_id, first).await?;
    backup(&client, user_id, second).await?;
    list(&client, user_id).await?;
    restore(&client, user_id, first).await?;
    delete(&client, user_id, first).await?;
    restore(&client, user_id, first).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        eprintln!("[Client] Error: {e}");
    }
    println!("[Client] Exiting program...");
}
