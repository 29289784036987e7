use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "coursecorpus",
    version,
    about = "Course-material transcription and training-corpus tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Ingest(IngestArgs),
    Clean(CleanArgs),
    Salvage(SalvageArgs),
    Tag(TagArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    /// Folders scanned for PDF course material; defaults to the standard
    /// slides and textbook folders when omitted.
    #[arg(long = "materials-root")]
    pub materials_roots: Vec<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long = "materials-root")]
    pub materials_roots: Vec<PathBuf>,

    #[arg(long, default_value = "data/course_train.jsonl")]
    pub output_path: PathBuf,

    #[arg(long, default_value = "output_images")]
    pub image_dir: PathBuf,

    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = IngestMode::Convert)]
    pub mode: IngestMode,

    /// Task framing text stamped on every record; defaults per mode.
    #[arg(long)]
    pub instruction: Option<String>,

    #[arg(long, default_value_t = 300)]
    pub dpi: u32,

    #[arg(long, default_value_t = 600)]
    pub service_timeout_secs: u64,

    #[arg(long, default_value_t = 3)]
    pub poll_interval_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub min_block_chars: usize,

    #[arg(long)]
    pub max_pages_per_doc: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub no_captions: bool,

    #[arg(long, default_value = "https://api.mathpix.com")]
    pub transcription_base_url: String,

    #[arg(long, default_value = "https://api.openai.com")]
    pub caption_base_url: String,

    #[arg(long, default_value = "gpt-4-vision-preview")]
    pub caption_model: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IngestMode {
    /// Cloud transcription first, local OCR fallback; block-level records.
    Convert,
    /// Local rasterize + OCR only; one record per page.
    OcrOnly,
}

impl IngestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::OcrOnly => "ocr-only",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[arg(long, default_value = "data/course_train.jsonl")]
    pub input: PathBuf,

    #[arg(long, default_value = "data/course_train_clean.jsonl")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SalvageArgs {
    #[arg(long, default_value = "data/course_train.jsonl")]
    pub input: PathBuf,

    #[arg(long, default_value = "data/course_salvaged.jsonl")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct TagArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = TagMode::Subject)]
    pub mode: TagMode,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TagMode {
    /// Rebuild `meta` with broad subject tags from the instruction text.
    Subject,
    /// Add fine-grained `meta.concept_tags` from the output text.
    Concepts,
}

impl TagMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Concepts => "concepts",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,
}
