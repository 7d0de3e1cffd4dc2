use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use engine::{GameMode, Side};
use match_api::routes::{ChatReq, CreateSessionReq, JoinReq, LeverageReq, OpenReq, UserReq};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "clash-cli", about = "Command line client for the match_api HTTP endpoints")]
struct Args {
    #[arg(long, env = "CLASH_API", default_value = "http://127.0.0.1:8787")]
    api: String,

    /// Acting user for commands that need one.
    #[arg(long, env = "CLASH_USER", default_value = "cli-user")]
    user: String,

    #[arg(long, env = "CLASH_NAME", default_value = "CLI")]
    name: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Blitz,
    Rapid,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SideArg {
    Long,
    Short,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Open a lobby (or an AI match with --ai).
    Create {
        #[arg(long, value_enum, default_value_t = ModeArg::Blitz)]
        mode: ModeArg,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        external_ref: Option<u64>,
        #[arg(long, default_value_t = false)]
        ai: bool,
    },
    Join { id: String },
    Show { id: String },
    Open {
        id: String,
        #[arg(value_enum)]
        side: SideArg,
        collateral: f64,
    },
    Close { id: String },
    Leverage { id: String, leverage: u32 },
    Chat { id: String, text: String },
    Tick { id: String },
    Finish { id: String },
    History {
        /// Defaults to --user.
        user_id: Option<String>,
    },
    Leaderboard,
    Status,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self.http.get(self.url(path)).send().await?;
        read(resp).await
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Value> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        read(resp).await
    }
}

async fn read(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let msg = body.get("error").and_then(Value::as_str).unwrap_or("request failed");
        return Err(anyhow!("{status}: {msg}"));
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client { http: reqwest::Client::new(), base: args.api.clone() };
    let user = || UserReq { user_id: args.user.clone() };

    let out = match args.cmd {
        Cmd::Create { mode, symbol, external_ref, ai } => {
            let req = CreateSessionReq {
                user_id: args.user.clone(),
                display_name: args.name.clone(),
                mode: Some(match mode {
                    ModeArg::Blitz => GameMode::Blitz,
                    ModeArg::Rapid => GameMode::Rapid,
                }),
                duration_seconds: None,
                symbol,
                external_ref,
            };
            let path = if ai { "/sessions/ai" } else { "/sessions" };
            client.post(path, &req).await?
        }
        Cmd::Join { id } => {
            let req = JoinReq { user_id: args.user.clone(), display_name: args.name.clone() };
            client.post(&format!("/sessions/{id}/join"), &req).await?
        }
        Cmd::Show { id } => client.get(&format!("/sessions/{id}")).await?,
        Cmd::Open { id, side, collateral } => {
            let side = match side {
                SideArg::Long => Side::Long,
                SideArg::Short => Side::Short,
            };
            let req = OpenReq { user_id: args.user.clone(), side, collateral };
            client.post(&format!("/sessions/{id}/open"), &req).await?
        }
        Cmd::Close { id } => client.post(&format!("/sessions/{id}/close"), &user()).await?,
        Cmd::Leverage { id, leverage } => {
            let req = LeverageReq { user_id: args.user.clone(), leverage };
            client.post(&format!("/sessions/{id}/leverage"), &req).await?
        }
        Cmd::Chat { id, text } => {
            let req = ChatReq { user_id: args.user.clone(), text };
            client.post(&format!("/sessions/{id}/chat"), &req).await?
        }
        Cmd::Tick { id } => client.post(&format!("/sessions/{id}/tick"), &user()).await?,
        Cmd::Finish { id } => client.post(&format!("/sessions/{id}/finish"), &user()).await?,
        Cmd::History { user_id } => {
            let who = user_id.unwrap_or_else(|| args.user.clone());
            client.get(&format!("/players/{who}/history")).await?
        }
        Cmd::Leaderboard => client.get("/leaderboard").await?,
        Cmd::Status => client.get("/status").await?,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
