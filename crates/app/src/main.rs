use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_multimodal_core::{
    ExtractionOptions, FormulaStrategy, HttpFormulaRecognizer, KnowledgeBase, LexicalScorer,
    LinkOptions, OcrEndpointConfig, PdfiumRasterizer, RetrievalOptions,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-multimodal", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding asset images and both index snapshots
    #[arg(long, env = "MULTIMODAL_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Folder searched recursively for PDFs
    #[arg(long, env = "DOCUMENTS_DIR", default_value = "./documents")]
    documents_dir: PathBuf,

    /// Formula OCR endpoint; formulas keep their heuristic text when unset
    #[arg(long, env = "FORMULA_OCR_ENDPOINT")]
    formula_ocr_endpoint: Option<String>,

    /// Bearer token for the formula OCR endpoint
    #[arg(long, env = "FORMULA_OCR_API_KEY")]
    formula_ocr_api_key: Option<String>,

    /// pdfium shared library; the system library is used when unset
    #[arg(long, env = "PDFIUM_LIBRARY")]
    pdfium_library: Option<PathBuf>,

    /// Also link chunks to assets on pages within this distance
    #[arg(long)]
    proximity_window: Option<u32>,

    /// Classify every formula-looking block instead of searching for numbered equations
    #[arg(long, default_value_t = false)]
    heuristic_formulas: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the index for every document, or only for one file name.
    Index {
        #[arg(long)]
        document: Option<String>,
    },
    /// Index documents that are not in the store yet.
    Sync {
        /// Rebuild everything instead.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Assemble the text and image context for a question.
    Query {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "10")]
        k: usize,
        #[arg(long, default_value = "6")]
        max_images: usize,
        /// Keep only chunks whose source contains this text.
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value = "1")]
        page_window: u32,
        /// Re-rank the expanded chunk set by keyword overlap.
        #[arg(long, default_value_t = false)]
        rerank: bool,
    },
    /// Print asset and link counts.
    Stats,
    /// Look up assets by id, by page, or by linked chunk.
    Lookup {
        #[arg(long)]
        id: Option<String>,
        #[arg(long, requires = "page")]
        source: Option<String>,
        #[arg(long, requires = "source")]
        page: Option<u32>,
        #[arg(long)]
        chunk: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.data_dir.display(),
        "pdf-multimodal boot"
    );

    let options = ExtractionOptions {
        formula_strategy: if cli.heuristic_formulas {
            FormulaStrategy::Heuristic
        } else {
            FormulaStrategy::Numbered
        },
        ..ExtractionOptions::default()
    };

    let mut base = KnowledgeBase::open(&cli.data_dir, &cli.documents_dir, options)
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?
        .with_link_options(LinkOptions {
            proximity_window: cli.proximity_window,
        });
    if matches!(cli.command, Command::Index { .. } | Command::Sync { .. }) {
        base = attach_collaborators(base, &cli)?;
    }

    match cli.command {
        Command::Index { document } => {
            let report = base
                .rebuild(document.as_deref())
                .context("indexing documents")?;
            print_failures(&report);
            println!("{report}");
        }
        Command::Sync { force } => {
            let report = base.sync(force).context("syncing documents")?;
            print_failures(&report);
            println!("{report}");
        }
        Command::Query {
            query,
            k,
            max_images,
            source,
            page_window,
            rerank,
        } => {
            let options = RetrievalOptions {
                k,
                max_images,
                source_filter: source,
                page_window,
                ..RetrievalOptions::default()
            };
            let mut orchestrator = base.orchestrator()?;
            if rerank {
                orchestrator = orchestrator.with_scorer(LexicalScorer);
            }
            let bundle = orchestrator
                .retrieve(&query, &options)
                .context("retrieving context")?;

            if bundle.is_empty() {
                println!("no context found for: {query}");
                return Ok(());
            }
            println!("{}", bundle.text);
            for path in &bundle.formula_paths {
                println!("formula_image={path}");
            }
            for path in &bundle.figure_paths {
                println!("figure_image={path}");
            }
        }
        Command::Stats => {
            let index = base.index();
            println!("{}", index.statistics());
            println!("text chunks: {}", base.vectors().len());
            println!("documents: {}", base.vectors().sources().len());
            if let Some(saved_at) = &index.metadata().saved_at {
                println!("saved at: {saved_at}");
            }
        }
        Command::Lookup {
            id,
            source,
            page,
            chunk,
        } => {
            let index = base.index();
            if let Some(id) = id {
                match (index.figure(&id), index.formula(&id)) {
                    (Some(figure), _) => println!("{figure:#?}"),
                    (None, Some(formula)) => println!("{formula:#?}"),
                    (None, None) => println!("no asset with id {id}"),
                }
            }
            if let (Some(source), Some(page)) = (source, page) {
                for figure in index.figures_on_page(&source, page) {
                    println!("figure {} {} caption={}", figure.figure_id, figure.image_path, figure.caption);
                }
                for formula in index.formulas_on_page(&source, page) {
                    println!("formula {} {} text={}", formula.formula_id, formula.image_path, formula.text);
                }
            }
            if let Some(chunk) = chunk {
                for figure in index.related_figures(&chunk) {
                    println!("figure {} {}", figure.figure_id, figure.image_path);
                }
                for formula in index.related_formulas(&chunk) {
                    println!("formula {} {}", formula.formula_id, formula.image_path);
                }
            }
        }
    }

    Ok(())
}

/// Rasterizer and formula recogniser are optional: without them the affected assets are
/// skipped or keep their heuristic text.
fn attach_collaborators(base: KnowledgeBase, cli: &Cli) -> anyhow::Result<KnowledgeBase> {
    let rasterizer = match &cli.pdfium_library {
        Some(path) => PdfiumRasterizer::from_library_path(path),
        None => PdfiumRasterizer::from_system_library(),
    };
    let base = match rasterizer {
        Ok(rasterizer) => base.with_extractor(|extractor| extractor.with_rasterizer(rasterizer)),
        Err(error) => {
            warn!(%error, "page rendering disabled; vector figures and formulas will be skipped");
            base
        }
    };

    let config = OcrEndpointConfig::new(
        cli.formula_ocr_endpoint.as_deref(),
        cli.formula_ocr_api_key.as_deref(),
    );
    let Some(config) = config else {
        info!("no formula OCR endpoint configured");
        return Ok(base);
    };
    let recognizer = HttpFormulaRecognizer::new(config).context("configuring formula OCR")?;
    Ok(base.with_extractor(|extractor| extractor.with_recognizer(recognizer)))
}

fn print_failures(report: &pdf_multimodal_core::IndexingReport) {
    for failed in &report.failed {
        warn!(path = %failed.path.display(), reason = %failed.reason, "skipped pdf");
    }
    if report.documents == 0 && !report.failed.is_empty() {
        println!("0 documents indexed (all files were skipped)");
    }
}
