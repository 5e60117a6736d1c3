use clap::{ArgAction, Parser};
use redis_aggz::{
    now_ms, run, AggregationMode, Client, ConnectionConfig, KeySpace, RunConfig, RunSummary,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 6379)]
    port: u16,

    /// Full connection string, `redis://[user[:password]@]host[:port][/db]`;
    /// takes precedence over --host and --port
    #[arg(long)]
    url: Option<String>,

    /// ACL user name
    #[arg(long)]
    user: Option<String>,

    /// Password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Only aggregate; do not seed members or write entries
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    readonly: bool,

    /// Delete every key under the routing prefix before populating
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    resetmembers: bool,

    /// Length of the trailing window, in seconds
    #[arg(long, default_value_t = 3, allow_negative_numbers = true)]
    lookbackseconds: i64,

    /// Name of the SET holding member key names; its hash tag becomes the
    /// routing tag unless --routingtag is given
    #[arg(long)]
    memberskey: Option<String>,

    /// Routing tag shared by every generated key (without braces)
    #[arg(long)]
    routingtag: Option<String>,

    /// Number of member keys to create
    #[arg(long, default_value_t = 25)]
    keyquantity: usize,

    /// Entries written to each member key
    #[arg(long, default_value_t = 25)]
    entrycount: usize,

    /// Fall back to per-key reads when the server has no scripting
    #[arg(long)]
    fallback: bool,

    /// Also count the `{tag}` key itself when it holds a sorted set
    #[arg(long)]
    include_routing_key: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        let mut config = match self.url {
            Some(ref url) => ConnectionConfig::new(url.clone()),
            None if self.host.contains(':') => {
                ConnectionConfig::new(format!("redis://[{}]:{}", self.host, self.port))
            }
            None => ConnectionConfig::from_host_port(&self.host, self.port),
        };
        if let Some(ref user) = self.user {
            config = config.with_username(user.clone());
        }
        if let Some(ref password) = self.password {
            config = config.with_password(password.clone());
        }
        config
    }

    fn keyspace(&self) -> KeySpace {
        match (&self.routingtag, &self.memberskey) {
            (Some(tag), Some(key)) => KeySpace::new(tag.clone()).with_members_key(key.clone()),
            (Some(tag), None) => KeySpace::new(tag.clone()),
            (None, Some(key)) => KeySpace::from_members_key(key.clone()),
            (None, None) => RunConfig::default().keyspace,
        }
    }

    fn run_config(&self) -> RunConfig {
        RunConfig {
            keyspace: self.keyspace(),
            key_quantity: self.keyquantity,
            entry_count: self.entrycount,
            lookback_secs: self.lookbackseconds,
            reset_members: self.resetmembers,
            read_only: self.readonly,
            mode: if self.fallback {
                AggregationMode::AtomicWithFallback
            } else {
                AggregationMode::Atomic
            },
            include_routing_key: self.include_routing_key,
            ..RunConfig::default()
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\nResults from Lua: {}", summary.report);
    println!(
        "running the lua script with SMEMBERS logic took {} milliseconds",
        summary.elapsed.as_millis()
    );
    println!("The script gathered the data from {} keys", summary.members);
    println!(
        "The time window addressed was {} seconds",
        summary.report.lookback_secs
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let run_config = cli.run_config();

    let client = Client::connect(cli.connection_config()).await?;
    let summary = run(&client, &run_config, now_ms).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_style_flags() {
        let cli = Cli::parse_from([
            "redis-aggz",
            "--host",
            "localhost",
            "--port",
            "6380",
            "--readonly",
            "false",
            "--lookbackseconds",
            "600",
            "--keyquantity",
            "120",
            "--resetmembers",
            "true",
        ]);
        let config = cli.run_config();
        assert!(!config.read_only);
        assert!(config.reset_members);
        assert_eq!(config.lookback_secs, 600);
        assert_eq!(config.key_quantity, 120);
        assert_eq!(config.keyspace.members_key(), "{whoIsHungry?}");
        assert_eq!(
            cli.connection_config().connection_string,
            "redis://localhost:6380"
        );
    }

    #[test]
    fn test_bare_bool_flag_and_members_key() {
        let cli = Cli::parse_from(["redis-aggz", "--readonly", "--memberskey", "{T}", "--fallback"]);
        let config = cli.run_config();
        assert!(config.read_only);
        assert_eq!(config.keyspace.routing_tag(), "T");
        assert_eq!(config.mode, AggregationMode::AtomicWithFallback);
    }
}
