//! snapsql CLI
//!
//! Entry point for the command-line tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapsql::ir::to_pretty_json;
use snapsql::{Config, Pipeline};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "snapsql")]
#[command(about = "Compile annotated SQL templates to intermediate representation", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "snapsql.yaml")]
    config: PathBuf,

    /// Override the configured dialect (postgres, mysql, sqlite, mariadb)
    #[arg(long)]
    dialect: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile every template in the input directory to IR JSON files
    Compile {
        /// Override the configured input directory
        #[arg(long)]
        input: Option<PathBuf>,

        /// Override the configured output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Compile without writing output (validation only)
    Check {
        /// Override the configured input directory
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Compile one template and print a human-readable summary
    Explain {
        /// Path to a .snap.sql template
        template: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::from_file(&args.config).context("Failed to load configuration")?
    } else {
        eprintln!(
            "Warning: Config file {} not found, using defaults",
            args.config.display()
        );
        Config::default()
    };
    if let Some(dialect) = args.dialect {
        config.dialect = Some(dialect);
        if config.target_dialect().is_none() {
            anyhow::bail!(
                "invalid dialect '{}'. Valid values: postgres, mysql, sqlite, mariadb",
                config.dialect.as_deref().unwrap_or_default()
            );
        }
    }

    match args.command {
        Command::Compile { input, output } => {
            let input_dir = input.unwrap_or_else(|| config.input_dir.clone());
            let output_dir = output.unwrap_or_else(|| config.output_dir.clone());
            compile_all(&config, &input_dir, Some(&output_dir))
        }
        Command::Check { input } => {
            let input_dir = input.unwrap_or_else(|| config.input_dir.clone());
            compile_all(&config, &input_dir, None)
        }
        Command::Explain { template } => explain(&config, &template),
    }
}

fn explain(config: &Config, template: &Path) -> Result<()> {
    use snapsql::stage::table_refs::describe;

    let source = std::fs::read_to_string(template)
        .with_context(|| format!("Failed to read {}", template.display()))?;
    let result = Pipeline::new()
        .compile(&source, config)
        .map_err(|e| anyhow::anyhow!("{}: {}", template.display(), e))?;
    let ir = &result.format;
    let schema = if config.schema.tables.is_empty() {
        None
    } else {
        Some(snapsql::schema::DatabaseSchema::from_config(&config.schema))
    };

    println!("Template: {}", template.display());
    if !ir.function_name.is_empty() {
        println!("Function: {}", ir.function_name);
    }
    if !ir.description.is_empty() {
        println!("Description: {}", ir.description);
    }
    let affinity: &'static str = ir.response_affinity.into();
    println!("Affinity: {affinity}");
    if !ir.parameters.is_empty() {
        println!("Parameters:");
        for p in &ir.parameters {
            let optional = if p.optional { " (optional)" } else { "" };
            println!("  {}: {}{}", p.name, p.param_type, optional);
        }
    }
    let statement = snapsql::parser::parse(&snapsql::tokenize(&source)?)?.0;
    if !statement.table_refs.is_empty() {
        println!("Tables:");
        for r in &statement.table_refs {
            println!("  {}", describe(r, schema.as_ref()));
        }
    }
    if !ir.responses.is_empty() {
        println!("Responses:");
        for r in &ir.responses {
            let nullable = if r.is_nullable { "" } else { " not null" };
            println!("  {}: {}{}", r.name, r.base_type, nullable);
        }
    }
    println!("Instructions: {}", ir.instructions.len());
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn compile_all(config: &Config, input_dir: &Path, output_dir: Option<&Path>) -> Result<()> {
    let templates = collect_templates(input_dir)
        .with_context(|| format!("Failed to read input directory {}", input_dir.display()))?;
    if templates.is_empty() {
        eprintln!("Warning: no *.snap.sql templates under {}", input_dir.display());
        return Ok(());
    }
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let pipeline = Pipeline::new();
    for template in &templates {
        let source = std::fs::read_to_string(template)
            .with_context(|| format!("Failed to read {}", template.display()))?;
        let mut result = pipeline
            .compile(&source, config)
            .map_err(|e| anyhow::anyhow!("{}: {}", template.display(), e))?;
        for warning in &result.warnings {
            eprintln!("{}: warning: {}", template.display(), warning);
        }
        if result.format.name.is_empty() {
            result.format.name = template_stem(template);
        }
        if let Some(dir) = output_dir {
            let out_path = dir.join(format!("{}.json", template_stem(template)));
            let json = to_pretty_json(&result.format).context("Failed to serialize IR")?;
            std::fs::write(&out_path, json)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            println!("{} -> {}", template.display(), out_path.display());
        } else {
            println!("{}: ok", template.display());
        }
    }
    Ok(())
}

/// Template file name without the `.snap.sql` suffix.
fn template_stem(path: &Path) -> String {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    name.strip_suffix(".snap.sql")
        .unwrap_or(&name)
        .to_string()
}

/// All `*.snap.sql` files under `dir`, recursively, sorted for determinism.
fn collect_templates(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(".snap.sql"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}
