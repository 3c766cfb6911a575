#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

use std::io;
use std::io::Write;
use std::path;
use std::process;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use tokio::fs;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use super::printer;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ConversationId;
use crate::domain::models::Event;
use crate::domain::services::ConversationStore;
use crate::domain::services::StoreError;
use crate::infrastructure::api::HttpApi;

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
    process::exit(0);
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        bail!(format!(
            "Config file already exists at {config_file_path_str}"
        ));
    }

    if let Some(parent) = config_file_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::File::create(&config_file_path).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!("Created default config file at {config_file_path_str}");
    return Ok(());
}

fn build_store() -> (ConversationStore, JoinHandle<()>) {
    let api = Arc::new(HttpApi::default());
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let printer = printer::start(rx);

    return (ConversationStore::new(api.clone(), api, tx), printer);
}

/// Drops the store so the printer drains its remaining events, then exits
/// non-zero if the operation failed. Failures were already printed.
async fn finish<T>(
    store: ConversationStore,
    printer: JoinHandle<()>,
    res: Result<T, StoreError>,
) -> Result<T> {
    drop(store);
    printer.await?;

    match res {
        Ok(val) => return Ok(val),
        Err(_) => process::exit(1),
    }
}

/// Routes Ctrl+C to the send in flight. With nothing in flight the process
/// exits, the same as without a handler installed.
#[derive(Clone, Default)]
struct Interrupts {
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    fn listen(&self) -> JoinHandle<()> {
        let interrupts = self.clone();
        return tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !interrupts.interrupt().await {
                    process::exit(130);
                }
            }
        });
    }

    async fn begin(&self) -> CancellationToken {
        let abort = CancellationToken::new();
        *self.in_flight.lock().await = Some(abort.clone());

        return abort;
    }

    async fn end(&self) {
        *self.in_flight.lock().await = None;
    }

    /// Cancels the send in flight. Returns false when there was none.
    async fn interrupt(&self) -> bool {
        match self.in_flight.lock().await.take() {
            Some(abort) => {
                abort.cancel();
                return true;
            }
            None => return false,
        }
    }
}

async fn select_from_args(store: &mut ConversationStore, matches: &ArgMatches) -> Result<(), StoreError> {
    if let Some(id) = matches.get_one::<u64>("conversation") {
        store
            .select_conversation(ConversationId::Durable(*id))
            .await?;
    }

    return Ok(());
}

async fn send_once(
    store: &mut ConversationStore,
    interrupts: &Interrupts,
    content: &str,
) -> Result<(), StoreError> {
    let abort = interrupts.begin().await;
    let res = store
        .send_message_with_abort(content, &Config::get(ConfigKey::Model), abort)
        .await;
    interrupts.end().await;

    res?;
    return Ok(());
}

async fn run_send(matches: &ArgMatches) -> Result<()> {
    let content = matches
        .get_one::<String>("message")
        .map(|message| return message.to_string())
        .unwrap_or_default();

    let interrupts = Interrupts::default();
    let listener = interrupts.listen();

    let (mut store, printer) = build_store();
    let mut res = select_from_args(&mut store, matches).await;
    if res.is_ok() {
        res = send_once(&mut store, &interrupts, &content).await;
    }
    listener.abort();

    let active = store.active_id();
    finish(store, printer, res).await?;
    if let Some(id) = active {
        println!("{}", Paint::new(format!("Conversation ID: {id}")).dimmed());
    }

    return Ok(());
}

async fn run_chat(matches: &ArgMatches) -> Result<()> {
    let (mut store, printer) = build_store();
    if let Err(err) = select_from_args(&mut store, matches).await {
        return finish(store, printer, Err(err)).await;
    }

    for message in store.messages() {
        println!("{}", printer::format_message(message));
    }

    let interrupts = Interrupts::default();
    let listener = interrupts.listen();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", Paint::cyan("You:").bold());
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "/quit" || line == "/exit" {
            break;
        }

        // Failures are rendered by the printer and the next prompt continues
        // the same conversation.
        let _ = send_once(&mut store, &interrupts, line).await;
        tokio::task::yield_now().await;
    }
    listener.abort();

    return finish(store, printer, Ok(())).await;
}

async fn run_list() -> Result<()> {
    let (mut store, printer) = build_store();
    let res = store.list_conversations().await;

    let lines = store
        .conversations()
        .iter()
        .map(|conversation| return printer::format_conversation(conversation))
        .collect::<Vec<String>>();

    finish(store, printer, res).await?;
    if lines.is_empty() {
        println!("There are no conversations yet. Start one with `parley send`!");
    } else {
        println!("{}", lines.join("\n"));
    }

    return Ok(());
}

async fn run_messages(matches: &ArgMatches) -> Result<()> {
    let (mut store, printer) = build_store();
    let res = select_from_args(&mut store, matches).await;

    let lines = store
        .messages()
        .iter()
        .map(|message| return printer::format_message(message))
        .collect::<Vec<String>>();

    finish(store, printer, res).await?;
    println!("{}", lines.join("\n\n"));

    return Ok(());
}

async fn run_rename(matches: &ArgMatches) -> Result<()> {
    let id = *matches.get_one::<u64>("conversation").unwrap_or(&0);
    let title = matches
        .get_one::<String>("title")
        .map(|title| return title.to_string())
        .unwrap_or_default();

    let (mut store, printer) = build_store();
    let res = store.rename_conversation(id, &title).await;
    let renamed = finish(store, printer, res).await?;

    if renamed {
        println!("Renamed conversation {id}");
    } else {
        println!("A conversation title cannot be blank");
    }

    return Ok(());
}

async fn run_delete(matches: &ArgMatches) -> Result<()> {
    let id = *matches.get_one::<u64>("conversation").unwrap_or(&0);

    let (mut store, printer) = build_store();
    let res = store.delete_conversation(id).await;
    finish(store, printer, res).await?;

    println!("Deleted conversation {id}");
    return Ok(());
}

fn arg_conversation(required: bool) -> Arg {
    let arg = Arg::new("conversation")
        .value_parser(value_parser!(u64))
        .help("Conversation ID");

    if required {
        return arg.required(true);
    }

    return arg
        .short('i')
        .long("conversation")
        .num_args(1)
        .help("Conversation ID to continue. A new conversation is started when omitted.");
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. This command will fail if the file exists already.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        );
}

fn subcommand_send() -> Command {
    return Command::new("send")
        .about("Send a single message and stream the reply.")
        .arg(arg_conversation(false))
        .arg(
            Arg::new("message")
                .help("Message to send")
                .required(true),
        );
}

fn subcommand_chat() -> Command {
    return Command::new("chat")
        .about("Chat interactively. Each line is sent as a message, CTRL+C interrupts a reply in progress, and /quit exits.")
        .arg(arg_conversation(false));
}

pub fn build() -> Command {
    return Command::new("parley")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .arg_required_else_help(true)
        .subcommand(subcommand_send())
        .subcommand(subcommand_chat())
        .subcommand(Command::new("list").about("List conversations, most recent first."))
        .subcommand(
            Command::new("messages")
                .about("Print every message of a conversation.")
                .arg(arg_conversation(true)),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename a conversation.")
                .arg(arg_conversation(true))
                .arg(Arg::new("title").help("New title").required(true)),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a conversation.")
                .arg(arg_conversation(true)),
        )
        .subcommand(subcommand_config())
        .subcommand(subcommand_completions())
        .arg(
            Arg::new(ConfigKey::ConfigFile.to_string())
                .short('c')
                .long(ConfigKey::ConfigFile.to_string())
                .env("PARLEY_CONFIG_FILE")
                .num_args(1)
                .help(format!("Path to configuration file [default: {}]", Config::default(ConfigKey::ConfigFile)))
                .global(true)
        )
        .arg(
            Arg::new(ConfigKey::ApiURL.to_string())
                .long(ConfigKey::ApiURL.to_string())
                .env("PARLEY_API_URL")
                .num_args(1)
                .help(format!("Base URL of the chat server API. [default: {}]", Config::default(ConfigKey::ApiURL)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::ApiToken.to_string())
                .long(ConfigKey::ApiToken.to_string())
                .env("PARLEY_API_TOKEN")
                .num_args(1)
                .help("Bearer token attached to every request to the chat server.")
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::Model.to_string())
                .short('m')
                .long(ConfigKey::Model.to_string())
                .env("PARLEY_MODEL")
                .num_args(1)
                .help(format!("Model used to answer messages. [default: {}]", Config::default(ConfigKey::Model)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::RequestTimeout.to_string())
                .long(ConfigKey::RequestTimeout.to_string())
                .env("PARLEY_REQUEST_TIMEOUT")
                .num_args(1)
                .help(format!("Time to wait in milliseconds before timing out a non streaming request. [default: {}]", Config::default(ConfigKey::RequestTimeout)))
                .global(true),
        );
}

pub async fn parse() -> Result<()> {
    let matches = build().get_matches();

    match matches.subcommand() {
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
            }
            _ => {
                subcommand_config().print_long_help()?;
            }
        },
        Some((name, subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;

            match name {
                "send" => run_send(subcmd_matches).await?,
                "chat" => run_chat(subcmd_matches).await?,
                "list" => run_list().await?,
                "messages" => run_messages(subcmd_matches).await?,
                "rename" => run_rename(subcmd_matches).await?,
                "delete" => run_delete(subcmd_matches).await?,
                _ => build().print_long_help()?,
            }
        }
        None => {
            build().print_long_help()?;
        }
    }

    return Ok(());
}
