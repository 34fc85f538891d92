use flatfs::{Filesystem, Session};

const DEFAULT_IMAGE: &str = "disk.img";

fn prompt(separator: &str) -> Option<Vec<String>> {
    use std::io::Write;
    let mut line = String::new();
    print!("{separator}");
    std::io::stdout().flush().ok()?;
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.split_whitespace().map(str::to_string).collect()),
    }
}

fn execute(fs: &mut Filesystem, cmd: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if cmd.is_empty() {
        return Ok(());
    }
    match cmd[0].as_str() {
        "s" => println!["{}", fs.superblock()],
        "b" => {
            if cmd.len() == 2 {
                let index = cmd[1].parse()?;
                let block = flatfs::structs::Block {
                    index,
                    data: fs.read_block(index)?,
                };
                println!["{block}"];
            } else {
                println!["{}", fs.bitmap()?]
            }
        }
        "i" => {
            if cmd.len() == 2 {
                println!["{}", fs.get_inode(cmd[1].parse()?)?];
            } else {
                println!["usage: i <inode>"];
            }
        }
        "d" => {
            for entry in fs.list_entries()? {
                println!["{:>6}  {}", entry.inode, entry.name];
            }
        }
        "m" if cmd.len() == 2 => println!["{:#?}", fs.metadata(&cmd[1])?],
        _ => println!["commands: s | b [block] | i <inode> | d | m <name>"],
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_IMAGE.to_owned());
    let mut session = Session::new();
    session.mount_read_only(&path)?;
    while let Some(cmd) = prompt(">> ") {
        if let Err(e) = execute(session.filesystem()?, &cmd) {
            eprintln!("{e}");
        }
    }
    session.unmount()?;
    Ok(())
}
