use std::env;
use std::fs;
use std::io::{self, Cursor, Read, Write};

use tar_overlay::{Error, ResolveContext, ResolvedPath, Result, add_as, append, list, remove, stream_out};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let ctx = match ResolveContext::from_env() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let command = args[1].as_str();
    let operands = &args[2..];
    let ok = match command {
        "cat" if !operands.is_empty() => each(command, operands, |path| cat(&ctx, path)),
        "rm" if !operands.is_empty() => {
            let recursive = operands[0] == "-r";
            let paths = if recursive { &operands[1..] } else { operands };
            if paths.is_empty() {
                eprintln!("Error: rm requires at least one path");
                print_usage();
                std::process::exit(1);
            }
            each(command, paths, |path| rm(&ctx, path, recursive))
        }
        "add" if operands.len() >= 2 => {
            let tarfile = &operands[0];
            each(command, &operands[1..], |file| add_file(&ctx, tarfile, file))
        }
        "append" if operands.len() == 1 => each(command, operands, |path| append_stdin(&ctx, path)),
        "ls" if operands.len() == 1 => each(command, operands, |path| ls(&ctx, path)),
        "resolve" if !operands.is_empty() => each(command, operands, |path| {
            let resolved = ctx.resolve(path)?;
            match (resolved.archive(), resolved.in_archive()) {
                (Some(archive), Some(entry)) => println!("{}\t{}\t{}", resolved, archive, entry),
                _ => println!("{}", resolved),
            }
            Ok(())
        }),
        _ => {
            eprintln!("Error: Unknown command or missing operands '{}'", command);
            print_usage();
            std::process::exit(1);
        }
    };

    if !ok {
        std::process::exit(1);
    }
}

/// Runs `f` for every operand, reporting failures without stopping.
fn each(command: &str, operands: &[String], mut f: impl FnMut(&str) -> Result<()>) -> bool {
    let mut ok = true;
    for operand in operands {
        if let Err(e) = f(operand) {
            eprintln!("{}: {}: {}", command, operand, e);
            ok = false;
        }
    }
    ok
}

/// Splits a resolved path into (archive, entry), failing for plain paths.
fn inside_archive(resolved: &ResolvedPath) -> Result<(&str, &str)> {
    match (resolved.archive(), resolved.in_archive()) {
        (Some(archive), Some(entry)) => Ok((archive, entry)),
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "not inside a tar archive").into()),
    }
}

fn cat(ctx: &ResolveContext, path: &str) -> Result<()> {
    let resolved = ctx.resolve(path)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match inside_archive(&resolved) {
        Ok((archive, entry)) => {
            if entry.is_empty() {
                return Err(Error::IsADirectory {
                    path: resolved.to_string(),
                });
            }
            stream_out(archive, entry, &mut out)?;
        }
        Err(_) => {
            let mut file = fs::File::open(resolved.as_str())?;
            io::copy(&mut file, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn rm(ctx: &ResolveContext, path: &str, recursive: bool) -> Result<()> {
    let resolved = ctx.resolve(path)?;
    let (archive, entry) = inside_archive(&resolved)?;
    let target = format!("{}/", resolved.as_str().trim_end_matches('/'));
    if format!("{}/", ctx.cwd.trim_end_matches('/')).starts_with(&target) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Impossible to remove, is prefix of pwd",
        )
        .into());
    }
    if entry.is_empty() {
        if !recursive {
            return Err(Error::IsADirectory {
                path: archive.to_string(),
            });
        }
        fs::remove_file(archive)?;
        return Ok(());
    }
    for name in remove(archive, entry, recursive)? {
        log::info!("removed {}/{}", archive, name);
    }
    Ok(())
}

fn add_file(ctx: &ResolveContext, tarfile: &str, file: &str) -> Result<()> {
    let resolved = ctx.resolve(tarfile)?;
    let (archive, dir) = inside_archive(&resolved)?;
    let source = ctx.make_absolute(file);
    let file_name = std::path::Path::new(&source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath { path: file.to_string() })?;
    let entry = if dir.is_empty() {
        file_name
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), file_name)
    };
    add_as(archive, &source, &entry)
}

fn append_stdin(ctx: &ResolveContext, path: &str) -> Result<()> {
    let resolved = ctx.resolve(path)?;
    let (archive, entry) = inside_archive(&resolved)?;
    let mut data = Vec::new();
    io::stdin().read_to_end(&mut data)?;
    let size = append(archive, entry, &mut Cursor::new(data))?;
    log::info!("{} is now {} bytes", resolved, size);
    Ok(())
}

fn ls(ctx: &ResolveContext, path: &str) -> Result<()> {
    let resolved = ctx.resolve(path)?;
    let (archive, _) = inside_archive(&resolved)?;
    let headers = list(archive)?;
    println!("Files in {}:", archive);
    println!("{:>10}  {}", "Size", "Name");
    println!("{}", "-".repeat(50));
    for header in &headers {
        println!("{:>10}  {}", header.size, header.name);
    }
    println!("\nTotal: {} entries", headers.len());
    Ok(())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cat <path>...                 - Print files, inside archives or not");
    eprintln!("  rm [-r] <path>...             - Remove entries from archives");
    eprintln!("  add <archive[/dir]> <file>... - Add files to an archive");
    eprintln!("  append <path>                 - Append stdin to an archive entry");
    eprintln!("  ls <archive>                  - List entries of an archive");
    eprintln!("  resolve <path>...             - Print canonical paths");
}
