use std::net::SocketAddr;
use std::path::PathBuf;

use thumbnail_editor_core::api::server::serve;
use thumbnail_editor_core::config::EditorConfig;
use thumbnail_editor_core::imaging::chroma_key::chroma_key;
use thumbnail_editor_core::imaging::{EditableImage, StdImageCodec};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Serve { app_root: Option<PathBuf> },
    ChromaKey { input: PathBuf, output: PathBuf },
    Help,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    match parse_cli_args(&cli_args)? {
        CliCommand::Help => {
            print_usage();
            Ok(())
        }
        CliCommand::ChromaKey { input, output } => run_chroma_key_cli(input, output),
        CliCommand::Serve { app_root } => {
            let app_root = match app_root {
                Some(root) => root,
                None => std::env::current_dir()?,
            };
            let config = EditorConfig::resolve(app_root.as_path())?;
            let addr: SocketAddr = config.bind.parse()?;
            serve(addr, config).await
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn parse_cli_args(args: &[String]) -> Result<CliCommand, Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(CliCommand::Help);
    }
    match args.first().map(String::as_str) {
        Some("chroma-key") => {
            let [input, output] = &args[1..] else {
                return Err(std::io::Error::other(
                    "chroma-key expects <input> <output>\n\nUse --help for usage.",
                )
                .into());
            };
            Ok(CliCommand::ChromaKey {
                input: PathBuf::from(input),
                output: PathBuf::from(output),
            })
        }
        Some("serve") => parse_serve_args(&args[1..]),
        _ => parse_serve_args(args),
    }
}

fn parse_serve_args(args: &[String]) -> Result<CliCommand, Box<dyn std::error::Error>> {
    let mut app_root = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--app-root" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
                };
                app_root = Some(PathBuf::from(value));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }
    Ok(CliCommand::Serve { app_root })
}

fn run_chroma_key_cli(input: PathBuf, output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let image = EditableImage::from_bytes(std::fs::read(input.as_path())?)?;
    let keyed = chroma_key(&StdImageCodec, &image)?;
    std::fs::write(output.as_path(), keyed.bytes())?;
    info!(
        input = %input.display(),
        output = %output.display(),
        bytes = keyed.len(),
        "wrote keyed layer"
    );
    Ok(())
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  thumbnail-editor-core [serve] [--app-root PATH]\n",
        "  thumbnail-editor-core chroma-key <input> <output>\n\n",
        "Defaults:\n",
        "  --app-root defaults to the current directory (.env and config/editor.settings.toml are read from it)\n",
        "  bind address: THUMB_EDITOR_BIND or 127.0.0.1:8790\n"
    ));
}
