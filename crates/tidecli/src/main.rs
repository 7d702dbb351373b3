use anyhow::Result;
use clap::{Parser, Subcommand};
use petgraph::dot::Dot;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidecore::{ProgramDesc, Value};
use tideruntime::{Engine, EngineConfig, Program, StaticModuleServer};

#[derive(Parser)]
#[command(name = "tide")]
#[command(about = "Reactive dataflow program runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a program and print its result
    Run {
        /// Path to program JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Props as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// JSON file mapping module ids to module descriptors
        #[arg(short, long)]
        modules: Option<PathBuf>,

        /// Maximum concurrent module fetches
        #[arg(long, default_value_t = 8)]
        concurrency: usize,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Build a program and report its diagnostics
    Validate {
        /// Path to program JSON file
        file: PathBuf,

        /// JSON file mapping module ids to module descriptors
        #[arg(short, long)]
        modules: Option<PathBuf>,
    },

    /// List available operator types
    Operators,

    /// Print the dependency graph of a program as Graphviz DOT
    Graph {
        /// Path to program JSON file
        file: PathBuf,
    },

    /// Create a new example program
    Init {
        /// Output file path
        #[arg(short, long, default_value = "program.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            modules,
            concurrency,
            verbose,
        } => {
            if verbose {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::INFO)
                    .init();
            }

            let config = EngineConfig {
                trace_execution: verbose,
                fetch_concurrency: concurrency,
                ..EngineConfig::default()
            };
            run_program(&file, input, modules.as_deref(), config).await?;
        }

        Commands::Validate { file, modules } => {
            validate_program(&file, modules.as_deref()).await?;
        }

        Commands::Operators => {
            list_operators();
        }

        Commands::Graph { file } => {
            print_graph(&file).await?;
        }

        Commands::Init { output } => {
            create_example_program(&output)?;
        }
    }

    Ok(())
}

fn create_engine(modules: Option<&Path>, config: EngineConfig) -> Result<Engine> {
    let mut catalog = tideruntime::Catalog::new();
    tidenodes::register_all(&mut catalog);
    let engine = Engine::with_catalog(catalog, config);

    let Some(path) = modules else {
        return Ok(engine);
    };
    let descriptors: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut server = StaticModuleServer::new();
    for (id, descriptor) in descriptors {
        server.insert(id, descriptor);
    }
    Ok(engine.with_module_server(Arc::new(server)))
}

fn load_program(file: &Path) -> Result<ProgramDesc> {
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    Ok(ProgramDesc::from_json(&json)?)
}

fn print_diagnostics(program: &Program) {
    for diagnostic in program.diagnostics().iter() {
        println!("   {}", diagnostic);
    }
}

async fn run_program(
    file: &Path,
    input: Option<String>,
    modules: Option<&Path>,
    config: EngineConfig,
) -> Result<()> {
    println!("Loading program from: {}", file.display());

    let desc = load_program(file)?;
    let engine = create_engine(modules, config)?;
    let program = engine.compile(&desc).await?;

    println!("Program: {}", if desc.name.is_empty() { "<root>" } else { desc.name.as_str() });
    println!("   Nodes: {}", program.graph().len());
    println!("   Slots: {}", program.slot_count());
    if !program.diagnostics().is_empty() {
        println!("   Diagnostics:");
        print_diagnostics(&program);
    }
    println!();

    let props = match input {
        Some(input) => Value::from(serde_json::from_str::<serde_json::Value>(&input)?),
        None => Value::Undefined,
    };
    let context = program.create_context(props);
    if program.trace_execution() {
        println!("Executed slots: {:?}", context.last_executed());
    }

    match context.read() {
        Ok(result) => {
            println!("Result:");
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
        Err(error) => println!("Result: {}", error),
    }

    Ok(())
}

async fn validate_program(file: &Path, modules: Option<&Path>) -> Result<()> {
    println!("Validating program: {}", file.display());

    let desc = load_program(file)?;
    let engine = create_engine(modules, EngineConfig::default())?;
    let program = engine.compile(&desc).await?;

    if program.diagnostics().has_errors() {
        println!("Program has errors:");
        print_diagnostics(&program);
        return Err(anyhow::anyhow!(
            "{} diagnostic(s) reported",
            program.diagnostics().len()
        ));
    }

    println!("Program is valid:");
    println!("   Nodes: {}", program.graph().len());
    println!("   Scopes: {}", program.graph().scopes().count());
    println!("   Modules: {}", program.modules().len());
    print_diagnostics(&program);

    Ok(())
}

fn list_operators() {
    println!("Available Operators:");
    println!();

    let catalog = tidenodes::standard_catalog();
    for tag in catalog.list_models() {
        if let Some(metadata) = catalog.get_metadata(&tag) {
            println!("  * {} ({})", tag, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  * {}", tag);
        }
    }
}

async fn print_graph(file: &Path) -> Result<()> {
    let desc = load_program(file)?;
    let engine = create_engine(None, EngineConfig::default())?;
    let program = engine.compile(&desc).await?;

    println!("{}", Dot::new(&program.dependency_graph()));
    Ok(())
}

fn create_example_program(output: &Path) -> Result<()> {
    let program = json!({
        "type": "program",
        "name": "card",
        "props": {
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": { "name": { "type": "string" } }
                }
            }
        },
        "result": {
            "type": "collection",
            "values": {
                "title": { "$ref": "card/user/name" },
                "tags": { "type": "list", "items": ["new", { "$ref": "card/user/role" }] }
            }
        }
    });

    std::fs::write(output, serde_json::to_string_pretty(&program)?)?;

    println!("Created example program: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  tide run --file {} --input '{{\"user\": {{\"name\": \"Ada\", \"role\": \"admin\"}}}}'",
        output.display()
    );

    Ok(())
}
