use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use events::UserId;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

/// A development session: `token=userId`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    pub user_id: UserId,
}

impl FromStr for SessionToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (token, user_id) = s
            .split_once('=')
            .ok_or_else(|| format!("expected token=userId, got {s:?}"))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(format!("empty session token in {s:?}"));
        }
        let user_id = user_id
            .trim()
            .parse::<UserId>()
            .map_err(|e| format!("invalid user id in {s:?}: {e}"))?;
        Ok(Self {
            token: token.to_string(),
            user_id,
        })
    }
}

/// Development chat membership: `chatId=userId:userId:...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMembers {
    pub id: i64,
    pub members: Vec<UserId>,
}

impl FromStr for ChatMembers {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, members) = s
            .split_once('=')
            .ok_or_else(|| format!("expected chatId=userId:userId, got {s:?}"))?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid chat id in {s:?}: {e}"))?;
        let members = members
            .split(':')
            .map(|member| {
                member
                    .trim()
                    .parse::<UserId>()
                    .map_err(|e| format!("invalid member id {member:?} in {s:?}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { id, members })
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Seconds between `: heartbeat` comments on open event streams
    #[arg(long, env, default_value_t = 30)]
    pub sse_keepalive_secs: u64,

    /// Development sessions accepted by the in-memory session resolver,
    /// as comma separated `token=userId` pairs.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub session_tokens: Vec<SessionToken>,

    /// Development conversation participants for the in-memory directory,
    /// as comma separated `conversationId=userId:userId` entries.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub conversation_members: Vec<ChatMembers>,

    /// Development group members for the in-memory directory,
    /// as comma separated `groupId=userId:userId` entries.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub group_members: Vec<ChatMembers>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    /// Defaults plus environment overrides, without reading the process
    /// arguments. Used by tests and embedders.
    fn default() -> Self {
        Config::parse_from([env!("CARGO_PKG_NAME")])
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn sse_keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.sse_keepalive_secs.max(1))
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
