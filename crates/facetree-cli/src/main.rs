//! facetree CLI
//!
//! - `build`: load ontology files, build the field trees, write a snapshot
//! - `inspect`: summarize a snapshot
//! - `tree`: print one stored tree as an outline
//! - `slice`: write the trees of one template to a new snapshot

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use facetree_field::{build_all, FieldDef, FieldKey};
use facetree_ontology::{CatalogLoader, Hierarchy, RdfFileSource, Vocabulary};
use facetree_snapshot::Snapshot;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "facetree")]
#[command(author, version, about = "Faceted taxonomy trees from RDF ontologies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build field trees from ontology files and write a snapshot.
    Build {
        /// Ontology files (.nt, .ttl, .rdf, .owl, .xml).
        #[arg(required = true)]
        ontology: Vec<PathBuf>,
        /// JSON array of field definitions.
        #[arg(long)]
        fields: PathBuf,
        /// JSON vocabulary override (predicate identifiers).
        #[arg(long)]
        vocab: Option<PathBuf>,
        /// Namespace whose is-a edges take precedence.
        #[arg(long)]
        authoritative: Option<String>,
        /// File with one uri per line to drop from the catalog.
        #[arg(long)]
        exclude: Option<PathBuf>,
        /// Store every catalog term, not only those the trees reference.
        #[arg(long)]
        with_catalog: bool,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Summarize a snapshot.
    Inspect {
        snapshot: PathBuf,
        /// Field definitions to bind stored trees against.
        #[arg(long)]
        fields: Option<PathBuf>,
    },

    /// Print one stored tree as an indented outline.
    Tree {
        snapshot: PathBuf,
        #[arg(long)]
        template: String,
        #[arg(long)]
        property: String,
        /// Group path, `/`-separated.
        #[arg(long)]
        group: Option<String>,
    },

    /// Write the trees of one template to a new snapshot.
    Slice {
        snapshot: PathBuf,
        #[arg(long)]
        template: String,
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,facetree_ontology=info,facetree_field=info,facetree_snapshot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            ontology,
            fields,
            vocab,
            authoritative,
            exclude,
            with_catalog,
            out,
        } => cmd_build(
            &ontology,
            &fields,
            vocab.as_deref(),
            authoritative,
            exclude.as_deref(),
            with_catalog,
            &out,
        ),
        Commands::Inspect { snapshot, fields } => cmd_inspect(&snapshot, fields.as_deref()),
        Commands::Tree {
            snapshot,
            template,
            property,
            group,
        } => cmd_tree(&snapshot, &template, &property, group.as_deref()),
        Commands::Slice {
            snapshot,
            template,
            out,
        } => cmd_slice(&snapshot, &template, &out),
    }
}

fn cmd_build(
    ontology: &[PathBuf],
    fields_path: &Path,
    vocab: Option<&Path>,
    authoritative: Option<String>,
    exclude: Option<&Path>,
    with_catalog: bool,
    out: &Path,
) -> Result<()> {
    let fields = read_fields(fields_path)?;

    let mut vocabulary = match vocab {
        Some(path) => Vocabulary::from_json_file(path)?,
        None => Vocabulary::default(),
    };
    if let Some(ns) = authoritative {
        vocabulary = vocabulary.with_authoritative_namespace(ns);
    }

    let exclude: BTreeSet<String> = match exclude {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading exclude list {}", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect(),
        None => BTreeSet::new(),
    };

    let sources = ontology
        .iter()
        .map(|path| RdfFileSource::open(path).with_context(|| format!("opening {}", path.display())))
        .collect::<Result<Vec<_>>>()?;

    eprintln!(
        "{} {} ontology file(s)",
        "Loading".green().bold(),
        sources.len()
    );
    let loader = CatalogLoader::new();
    loader.subscribe(|fraction| tracing::debug!(progress = fraction, "catalog load"));
    loader.start(sources, exclude, vocabulary);
    let catalog = loader
        .wait()
        .map_err(|e| anyhow!("catalog load failed: {e}"))?;

    let hierarchy = Hierarchy::values(catalog.clone());
    let trees = build_all(&hierarchy, &fields);
    for tree in &trees {
        if !tree.unresolved().is_empty() {
            eprintln!(
                "{} {}: {} selector(s) not in the ontology",
                "warn:".yellow().bold(),
                tree.key().map(ToString::to_string).unwrap_or_default(),
                tree.unresolved().len()
            );
        }
    }

    let snapshot = if with_catalog {
        Snapshot::build_with_catalog(&trees, &catalog)
    } else {
        Snapshot::build(&trees)
    };
    write_snapshot(&snapshot, out)?;

    eprintln!(
        "{} {} ({} terms, {} trees)",
        "wrote".green().bold(),
        out.display().to_string().bold(),
        snapshot.terms().len(),
        snapshot.trees().len()
    );
    Ok(())
}

fn cmd_inspect(path: &Path, fields_path: Option<&Path>) -> Result<()> {
    let fields = match fields_path {
        Some(p) => read_fields(p)?,
        None => Vec::new(),
    };
    let snapshot = read_snapshot(path, &fields)?;

    println!("{} {}", "snapshot".bold(), path.display());
    println!("  terms:    {}", snapshot.terms().len());
    println!("  prefixes: {}", snapshot.terms().prefixes().len());
    println!("  remaps:   {}", snapshot.remaps().len());
    println!("  trees:    {}", snapshot.trees().len());
    for tree in snapshot.trees() {
        let property = snapshot.term_uri(tree.property).unwrap_or_default();
        let mut line = format!("    {} {}", tree.template_id.cyan(), property);
        if !tree.group_path.is_empty() {
            line.push_str(&format!(" @{}", tree.group_path.join("/")));
        }
        line.push_str(&format!(" ({} nodes)", tree.nodes.len()));
        if fields_path.is_some() && !tree.is_bound() {
            line.push_str(&format!(" {}", "unbound".yellow()));
        }
        println!("{line}");
    }
    Ok(())
}

fn cmd_tree(path: &Path, template: &str, property: &str, group: Option<&str>) -> Result<()> {
    let snapshot = read_snapshot(path, &[])?;
    let mut key = FieldKey::new(template, property);
    if let Some(group) = group {
        key = key.with_group_path(group.split('/').filter(|s| !s.is_empty()));
    }
    let tree = snapshot
        .tree(&key)
        .ok_or_else(|| anyhow!("no tree for field `{key}` in {}", path.display()))?;
    print!("{}", tree.render_outline());
    Ok(())
}

fn cmd_slice(path: &Path, template: &str, out: &Path) -> Result<()> {
    let snapshot = read_snapshot(path, &[])?;
    let slice = snapshot.slice(template);
    if slice.trees().is_empty() {
        eprintln!(
            "{} template `{}` has no trees in {}",
            "warn:".yellow().bold(),
            template,
            path.display()
        );
    }
    write_snapshot(&slice, out)?;
    eprintln!(
        "{} {} ({} trees)",
        "wrote".green().bold(),
        out.display().to_string().bold(),
        slice.trees().len()
    );
    Ok(())
}

fn read_fields(path: &Path) -> Result<Vec<FieldDef>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    FieldDef::list_from_json(&text).with_context(|| format!("parsing field definitions in {}", path.display()))
}

fn read_snapshot(path: &Path, fields: &[FieldDef]) -> Result<Snapshot> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Snapshot::deserialize(&mut BufReader::new(file), fields)
        .with_context(|| format!("decoding snapshot {}", path.display()))
}

/// Write next to the destination, then rename over it.
fn write_snapshot(snapshot: &Snapshot, out: &Path) -> Result<()> {
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    snapshot.serialize(&mut BufWriter::new(tmp.as_file_mut()))?;
    tmp.persist(out)
        .with_context(|| format!("writing {}", out.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_arguments() {
        let cli = Cli::try_parse_from([
            "facetree",
            "build",
            "core.ttl",
            "extra.nt",
            "--fields",
            "fields.json",
            "--authoritative",
            "http://example.org/",
            "--with-catalog",
            "-o",
            "out.ftsn",
        ])
        .unwrap();
        match cli.command {
            Commands::Build {
                ontology,
                with_catalog,
                authoritative,
                out,
                ..
            } => {
                assert_eq!(ontology.len(), 2);
                assert!(with_catalog);
                assert_eq!(authoritative.as_deref(), Some("http://example.org/"));
                assert_eq!(out, PathBuf::from("out.ftsn"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn build_requires_an_ontology_file() {
        assert!(Cli::try_parse_from(["facetree", "build", "--fields", "f.json", "-o", "x"]).is_err());
    }

    #[test]
    fn snapshot_written_atomically_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.ftsn");
        write_snapshot(&Snapshot::build(&[]), &out).unwrap();
        let back = read_snapshot(&out, &[]).unwrap();
        assert!(back.trees().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
