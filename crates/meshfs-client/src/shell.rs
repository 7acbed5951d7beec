//! Line-oriented shell commands.
//!
//! Each command is a thin translation onto one [`PeerClient`] call.

use meshfs_types::{PeerInfo, SetAttr};
use rand::seq::SliceRandom;

use crate::rpc::{ClientError, PeerClient};

pub const HELP: &str = "\
commands:
  mkdir <path>              create a directory
  mknod <path>              create an empty file
  symlink <target> <link>   create a symbolic link
  ln <existing> <new>       create a hard link
  write <path> <text...>    replace a file's contents
  read <path>               print a file's contents
  ls [path]                 list a directory (default /)
  stat <path>               show attributes
  mv <from> <to>            rename
  rename <path> <name>      rename in place
  rm <path>                 remove a file or link
  rmdir <path>              remove an empty directory
  locate <path>             which peer holds a path
  neighbors                 list the peer's neighbors
  paths                     list every path the peer holds itself
  unlink-neighbor           drop one random neighbor of the peer
  help                      this text
  exit                      leave the shell";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mkdir(String),
    Mknod(String),
    Symlink { target: String, link: String },
    Link { existing: String, new: String },
    Write { path: String, text: String },
    Read(String),
    Ls(String),
    Stat(String),
    Mv { from: String, to: String },
    Rename { path: String, name: String },
    Rm(String),
    Rmdir(String),
    Locate(String),
    Neighbors,
    Paths,
    UnlinkNeighbor,
    Help,
    Exit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parse one input line. Blank lines are `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        let Some((word, rest)) = split_word(line) else {
            return Ok(None);
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let one = |usage: &'static str| match args.as_slice() {
            [a] => Ok(a.to_string()),
            _ => Err(ParseError::Usage(usage)),
        };
        let two = |usage: &'static str| match args.as_slice() {
            [a, b] => Ok((a.to_string(), b.to_string())),
            _ => Err(ParseError::Usage(usage)),
        };

        let cmd = match word {
            "mkdir" => Command::Mkdir(one("mkdir <path>")?),
            "mknod" | "touch" => Command::Mknod(one("mknod <path>")?),
            "symlink" => {
                let (target, link) = two("symlink <target> <link>")?;
                Command::Symlink { target, link }
            }
            "ln" | "link" => {
                let (existing, new) = two("ln <existing> <new>")?;
                Command::Link { existing, new }
            }
            "write" => {
                // Everything after the path is the payload, spacing included.
                let Some((path, text)) = split_word(rest.trim_start()) else {
                    return Err(ParseError::Usage("write <path> <text...>"));
                };
                Command::Write {
                    path: path.to_string(),
                    text: text.to_string(),
                }
            }
            "read" | "cat" => Command::Read(one("read <path>")?),
            "ls" => match args.as_slice() {
                [] => Command::Ls("/".to_string()),
                [p] => Command::Ls(p.to_string()),
                _ => return Err(ParseError::Usage("ls [path]")),
            },
            "stat" => Command::Stat(one("stat <path>")?),
            "mv" => {
                let (from, to) = two("mv <from> <to>")?;
                Command::Mv { from, to }
            }
            "rename" => {
                let (path, name) = two("rename <path> <name>")?;
                Command::Rename { path, name }
            }
            "rm" | "unlink" => Command::Rm(one("rm <path>")?),
            "rmdir" => Command::Rmdir(one("rmdir <path>")?),
            "locate" => Command::Locate(one("locate <path>")?),
            "neighbors" => Command::Neighbors,
            "paths" => Command::Paths,
            "unlink-neighbor" => Command::UnlinkNeighbor,
            "help" | "?" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(cmd))
    }

    /// Run against a peer and render the result as text.
    pub async fn run(&self, client: &mut PeerClient) -> Result<String, ClientError> {
        let out = match self {
            Command::Mkdir(path) => client.mkdir(path).await.map(|_| "ok".to_string())?,
            Command::Mknod(path) => client.mknod(path).await.map(|_| "ok".to_string())?,
            Command::Symlink { target, link } => {
                client.symlink(target, link).await?;
                "ok".to_string()
            }
            Command::Link { existing, new } => {
                client.link(existing, new).await?;
                "ok".to_string()
            }
            Command::Write { path, text } => {
                client.write(path, text.as_bytes()).await?;
                format!("wrote {} bytes", text.len())
            }
            Command::Read(path) => String::from_utf8_lossy(&client.read(path).await?).into_owned(),
            Command::Ls(path) => client.readdir(path).await?.join("\n"),
            Command::Stat(path) => {
                let attr = client.getattr(path).await?;
                format!(
                    "{}  {}  size={}  links={}  open={}",
                    attr.name,
                    attr.kind.as_str(),
                    attr.size,
                    attr.nlink,
                    attr.open
                )
            }
            Command::Mv { from, to } => {
                client.rename(from, to).await?;
                "ok".to_string()
            }
            Command::Rename { path, name } => {
                client.setattr(path, SetAttr::Name(name.clone())).await?;
                "ok".to_string()
            }
            Command::Rm(path) => client.unlink(path).await.map(|_| "ok".to_string())?,
            Command::Rmdir(path) => client.rmdir(path).await.map(|_| "ok".to_string())?,
            Command::Locate(path) => client.locate(path).await?.to_string(),
            Command::Neighbors => client.neighbors().await?.join("\n"),
            Command::Paths => client.list_all_paths().await?.join("\n"),
            Command::UnlinkNeighbor => unlink_random_neighbor(client).await?,
            Command::Help => HELP.to_string(),
            Command::Exit => String::new(),
        };
        Ok(out)
    }
}

fn split_word(s: &str) -> Option<(&str, &str)> {
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}

/// Fault injection: sever one random edge from the connected peer's side.
async fn unlink_random_neighbor(client: &mut PeerClient) -> Result<String, ClientError> {
    let neighbors = client.neighbors().await?;
    let Some(choice) = neighbors.choose(&mut rand::thread_rng()).cloned() else {
        return Ok("no neighbors".to_string());
    };
    match choice.parse::<PeerInfo>() {
        Ok(peer) => {
            client.remove_neighbor(peer.id.clone()).await?;
            Ok(format!("removed {peer}"))
        }
        Err(e) => Ok(format!("cannot parse neighbor {choice:?}: {e}")),
    }
}
