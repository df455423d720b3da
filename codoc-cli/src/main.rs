use clap::{Parser, Subcommand};
use codoc_core::{DocumentId, RawOperation};
use codoc_session::SessionRegistry;
use codoc_storage::{DocumentStore, FileStore};
use codoc_sync::CollabServer;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory of the document store
    #[arg(long, default_value = ".codoc-store")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a document's persisted text and version
    Show {
        document_id: DocumentId,
        #[arg(long)]
        json: bool,
    },
    /// Seed a document from a text file
    Seed {
        document_id: DocumentId,
        file: PathBuf,
    },
    /// Replay a JSON batch of operations through the engine and persist
    Replay {
        document_id: DocumentId,
        ops_file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let store = match FileStore::open(&cli.store) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    match &cli.command {
        Commands::Show { document_id, json } => show_command(&store, *document_id, *json),
        Commands::Seed { document_id, file } => seed_command(&store, *document_id, file),
        Commands::Replay {
            document_id,
            ops_file,
        } => replay_command(store, *document_id, ops_file),
    }
}

fn show_command(store: &FileStore, document_id: DocumentId, json: bool) {
    let content = match store.load_content(&document_id) {
        Ok(Some(content)) => content,
        Ok(None) => {
            eprintln!("Document {document_id} not found");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    if json {
        let output = serde_json::json!({
            "documentId": document_id,
            "text": content.text,
            "version": content.version,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).expect("serializable output")
        );
    } else {
        println!("version: {}", content.version);
        println!("{}", content.text);
    }
}

fn seed_command(store: &FileStore, document_id: DocumentId, file: &PathBuf) {
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = store.save_content(&document_id, &text, 0) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
    println!("Seeded {document_id}");
}

fn replay_command(store: FileStore, document_id: DocumentId, ops_file: &PathBuf) {
    let ops: Vec<RawOperation> = match fs::read_to_string(ops_file)
        .map_err(|err| err.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|err| err.to_string()))
    {
        Ok(ops) => ops,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let store = Arc::new(store);
    let registry = Arc::new(SessionRegistry::new(store.clone()));
    let server = CollabServer::new(registry.clone());
    let connection = Uuid::new_v4();

    if let Err(err) = server.join(connection, "codoc-cli".to_string(), document_id) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
    let committed = match server.submit_ops(connection, document_id, ops) {
        Ok(committed) => committed,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let session = match registry.get(&document_id) {
        Some(session) => session,
        None => {
            eprintln!("Error: session vanished during replay");
            std::process::exit(1);
        }
    };
    if let Err(err) = store.save_content(&document_id, &session.text, session.version) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    println!(
        "Applied {} operation(s), version {}",
        committed.ops_applied.len(),
        committed.new_version
    );
}
