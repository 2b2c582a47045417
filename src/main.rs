use std::fs::{self, File};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use memmap2::Mmap;
use rayon::prelude::*;
use rootcause::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use igi_formats::data::ilff::{self, HeaderLayout};
use igi_formats::data::res::{self, ResArchive, ResError};
use igi_formats::diagnostics::{Diagnostic, DiagnosticLog};
use igi_formats::models::mef::{self, CHUNK_TAGS, Model, ParseOptions};
use igi_formats::models::mesh::StrideHint;
use igi_formats::models::obj;

/// Inspect and convert Project IGI 2 model and resource files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log decoder progress at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize one or more .mef files
    Info {
        files: Vec<PathBuf>,

        /// Print a JSON document instead of text
        #[arg(long)]
        json: bool,

        /// Ignore vertex counts stored in chunk headers when choosing a stride
        #[arg(long)]
        size_only: bool,
    },

    /// Dump the raw chunk table of a .mef file
    Chunks { file: PathBuf },

    /// Convert a Wavefront OBJ file to .mef
    Obj2mef {
        input: PathBuf,

        /// Output file. Defaults to the input with a .mef extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a .mef file to Wavefront OBJ
    Mef2obj {
        input: PathBuf,

        /// Output file. Defaults to the input with an .obj extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Work with .res archives
    #[command(subcommand)]
    Res(ResCommand),
}

#[derive(Subcommand, Debug)]
enum ResCommand {
    /// List archive entries
    List { archive: PathBuf },

    /// Extract every entry into a directory
    Extract {
        archive: PathBuf,

        /// Target directory. Defaults to the archive name without extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pack a directory into an archive
    Pack {
        dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct MeshSummary<'a> {
    name: &'a str,
    format: &'static str,
    vertices: usize,
    triangles: usize,
    dropped_triangles: usize,
    normals: bool,
    uvs: bool,
}

#[derive(Serialize)]
struct ModelSummary<'a> {
    path: &'a Path,
    declared_size: i32,
    layout: HeaderLayout,
    chunks: usize,
    total_vertices: usize,
    total_triangles: usize,
    meshes: Vec<MeshSummary<'a>>,
    diagnostics: &'a [Diagnostic],
}

impl<'a> ModelSummary<'a> {
    fn new(path: &'a Path, model: &'a Model) -> Self {
        ModelSummary {
            path,
            declared_size: model.file_size,
            layout: model.layout,
            chunks: model.chunks.len(),
            total_vertices: model.total_vertices,
            total_triangles: model.total_triangles,
            meshes: model
                .meshes
                .iter()
                .map(|m| MeshSummary {
                    name: &m.name,
                    format: m.format.name(),
                    vertices: m.vertex_count,
                    triangles: m.triangle_count,
                    dropped_triangles: m.dropped_triangles,
                    normals: m.normals.is_some(),
                    uvs: m.uvs.is_some(),
                })
                .collect(),
            diagnostics: model.diagnostics.entries(),
        }
    }
}

fn layout_name(layout: &HeaderLayout) -> &'static str {
    match layout {
        HeaderLayout::Full { .. } => "full header",
        HeaderLayout::Compact => "compact header",
    }
}

fn map_file(path: &Path) -> Result<Mmap, Report> {
    let file = File::open(path).context_with(|| format!("Failed to open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

fn load_model(path: &Path, options: &ParseOptions) -> Result<Model, Report> {
    let mmap = map_file(path)?;
    let model = mef::parse_with_options(&mmap, options)
        .context_with(|| format!("Failed to parse {}", path.display()))?;
    Ok(model)
}

/// Decode an archive, keeping whatever precedes a corrupt record.
fn load_archive(path: &Path) -> Result<ResArchive, Report> {
    let mmap = map_file(path)?;
    match res::decode_archive(&mmap) {
        Ok(archive) => Ok(archive),
        Err(report) => match report.current_context() {
            ResError::CorruptArchive {
                offset,
                reason,
                recovered,
            } => {
                warn!(
                    offset,
                    reason = reason.as_str(),
                    recovered = recovered.len(),
                    "archive is damaged, continuing with recovered entries"
                );
                Ok(ResArchive {
                    files: recovered.clone(),
                    total_size: u32::try_from(mmap.len()).unwrap_or(u32::MAX),
                })
            }
            _ => Err(report
                .context(format!("Failed to read archive {}", path.display()))
                .into_dynamic()),
        },
    }
}

fn print_diagnostics(log: &DiagnosticLog) {
    if log.is_empty() {
        return;
    }
    println!("  {} diagnostics:", log.len());
    for entry in log.entries() {
        println!("    {entry}");
    }
}

fn info(files: &[PathBuf], json: bool, options: ParseOptions) -> Result<(), Report> {
    let results: Vec<(&PathBuf, Result<Model, String>)> = files
        .par_iter()
        .map(|path| (path, load_model(path, &options).map_err(|e| format!("{e}"))))
        .collect();

    if json {
        let summaries: Vec<_> = results
            .iter()
            .filter_map(|(path, result)| match result {
                Ok(model) => Some(ModelSummary::new(path, model)),
                Err(e) => {
                    warn!("{e}");
                    None
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for (path, result) in &results {
        match result {
            Ok(model) => {
                println!(
                    "{}: {} meshes, {} vertices, {} triangles ({}, {} chunks)",
                    path.display(),
                    model.meshes.len(),
                    model.total_vertices,
                    model.total_triangles,
                    layout_name(&model.layout),
                    model.chunks.len()
                );
                if let Some(model_type) = model.model_info.model_type {
                    println!("  model type {model_type}");
                }
                for mesh in &model.meshes {
                    println!(
                        "  {:<16} {:<16} {:>6} vertices {:>6} triangles",
                        mesh.name,
                        mesh.format.name(),
                        mesh.vertex_count,
                        mesh.triangle_count
                    );
                }
                print_diagnostics(&model.diagnostics);
            }
            Err(e) => println!("{}: {e}", path.display()),
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!(files = results.len(), failed, "done");
    Ok(())
}

fn chunks(path: &Path) -> Result<(), Report> {
    let mmap = map_file(path)?;
    let mut log = DiagnosticLog::new();
    let container = ilff::decode_container(&mmap, &CHUNK_TAGS, &mut log)
        .context_with(|| format!("Failed to decode {}", path.display()))?;

    println!(
        "{}: declared size {}, {}",
        path.display(),
        container.declared_size,
        layout_name(&container.layout)
    );
    println!(
        "{:>10}  {:<6} {:<18} {:>10} {:>10} {:>10}",
        "offset", "tag", "kind", "size", "param", "next"
    );
    for chunk in &container.chunks {
        println!(
            "{:>#10X}  {:<6} {:<18} {:>10} {:>10} {:>10}",
            chunk.byte_offset,
            chunk.tag.to_string(),
            chunk.kind().to_string(),
            chunk.payload_size,
            chunk.param,
            chunk.next_offset
        );
    }
    print_diagnostics(&log);
    Ok(())
}

fn obj2mef(input: &Path, output: Option<PathBuf>) -> Result<(), Report> {
    let text = fs::read_to_string(input)
        .context_with(|| format!("Failed to read {}", input.display()))?;
    let data = mef::convert_obj(&text)
        .context_with(|| format!("Failed to convert {}", input.display()))?;
    let output = output.unwrap_or_else(|| input.with_extension("mef"));
    fs::write(&output, &data).context_with(|| format!("Failed to write {}", output.display()))?;
    info!(output = %output.display(), bytes = data.len(), "wrote MEF");
    Ok(())
}

fn mef2obj(input: &Path, output: Option<PathBuf>) -> Result<(), Report> {
    let model = load_model(input, &ParseOptions::default())?;
    let output = output.unwrap_or_else(|| input.with_extension("obj"));
    fs::write(&output, obj::write_obj(&model))
        .context_with(|| format!("Failed to write {}", output.display()))?;
    info!(
        output = %output.display(),
        meshes = model.meshes.len(),
        diagnostics = model.diagnostics.len(),
        "wrote OBJ"
    );
    Ok(())
}

fn run_res(command: ResCommand) -> Result<(), Report> {
    match command {
        ResCommand::List { archive } => {
            let archive = load_archive(&archive)?;
            for entry in &archive.files {
                println!("{:>10}  {}", entry.data.len(), entry.display_name());
            }
            info!(entries = archive.files.len(), declared_size = archive.total_size, "listed");
        }
        ResCommand::Extract { archive: path, output } => {
            let archive = load_archive(&path)?;
            let dir = output.unwrap_or_else(|| path.with_extension(""));
            let written = archive.extract_to_dir(&dir).context("Failed to extract archive")?;
            info!(dir = %dir.display(), files = written.len(), "extracted");
        }
        ResCommand::Pack { dir, output } => {
            let data = res::pack_dir(&dir)
                .context_with(|| format!("Failed to pack {}", dir.display()))?;
            fs::write(&output, &data)
                .context_with(|| format!("Failed to write {}", output.display()))?;
            info!(output = %output.display(), bytes = data.len(), "packed");
        }
    }
    Ok(())
}

fn main() -> Result<(), Report> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Info {
            files,
            json,
            size_only,
        } => {
            let stride_hint = if size_only {
                StrideHint::SizeOnly
            } else {
                StrideHint::ChunkParam
            };
            info(&files, json, ParseOptions { stride_hint })
        }
        Command::Chunks { file } => chunks(&file),
        Command::Obj2mef { input, output } => obj2mef(&input, output),
        Command::Mef2obj { input, output } => mef2obj(&input, output),
        Command::Res(command) => run_res(command),
    }
}
