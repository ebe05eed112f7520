use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use soiree::{
    Document, Editor, EditorOpts, ExportFormat, ExportOptions, LocalSources, LogicalSize,
    assets::NullAssetStore, player::ClipTransportProvider,
};

#[derive(Parser, Debug)]
#[command(name = "soiree", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flatten a saved composition document to a PNG or JPEG.
    Render(RenderArgs),
    /// Print a summary of a composition document.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input composition document JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output image path.
    #[arg(long)]
    out: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = FormatChoice::Png)]
    format: FormatChoice,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = 90)]
    quality: u8,

    /// Font file used to rasterize text layers.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Assets root for relative sources; defaults to the document's directory.
    #[arg(long)]
    assets_root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Input composition document JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Png,
    Jpeg,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Inspect(args) => cmd_inspect(args),
    }
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    let f = File::open(path).with_context(|| format!("open document '{}'", path.display()))?;
    let r = BufReader::new(f);
    let doc: Document = serde_json::from_reader(r).with_context(|| "parse document JSON")?;
    Ok(doc)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let doc = read_document(&args.in_path)?;
    let logical = doc.logical_size()?;

    let assets_root = args
        .assets_root
        .clone()
        .or_else(|| args.in_path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let mut editor = Editor::with_collaborators(
        EditorOpts::new(logical),
        Box::new(LocalSources::rooted(&assets_root)),
        Box::new(NullAssetStore),
        Box::new(ClipTransportProvider::new(LocalSources::rooted(
            &assets_root,
        ))),
    )?;
    editor.load_document(&doc, None)?;

    let font_bytes = match &args.font {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("read font '{}'", path.display()))?,
        ),
        None => None,
    };

    let format = match args.format {
        FormatChoice::Png => ExportFormat::Png,
        FormatChoice::Jpeg => ExportFormat::Jpeg {
            quality: args.quality,
        },
    };
    let bytes = editor.export_raster(&ExportOptions {
        format: Some(format),
        font_bytes,
    })?;
    std::fs::write(&args.out, bytes)
        .with_context(|| format!("write image '{}'", args.out.display()))?;

    println!(
        "rendered {}x{} -> {}",
        logical.width,
        logical.height,
        args.out.display()
    );
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let doc = read_document(&args.in_path)?;
    let logical: LogicalSize = doc.logical_size()?;

    println!("logical size: {}x{}", logical.width, logical.height);
    println!(
        "size key:     {}",
        doc.effective_size_key().as_deref().unwrap_or("(custom)")
    );
    match &doc.background {
        Some(bg) => println!("background:   {:?} <- {}", bg.tag, bg.source),
        None => println!("background:   solid fill"),
    }
    println!("layers:       {}", doc.objects.len());
    for obj in &doc.objects {
        println!(
            "  - [{:?}] {} (visible: {})",
            obj.layer_type,
            obj.layer_name.as_deref().unwrap_or("(unnamed)"),
            obj.visible,
        );
    }
    Ok(())
}
