use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use ln_starknet_swap::swap::{SwapDirection, SwapSpeed};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "SWAP_API_URL", default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// Bearer token for authenticated endpoints.
    #[arg(long, env = "SWAP_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Direction {
    LnToStarknet,
    StarknetToLn,
}

impl From<Direction> for SwapDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::LnToStarknet => SwapDirection::LnToStarknet,
            Direction::StarknetToLn => SwapDirection::StarknetToLn,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Speed {
    Instant,
    Normal,
}

impl From<Speed> for SwapSpeed {
    fn from(s: Speed) -> Self {
        match s {
            Speed::Instant => SwapSpeed::Instant,
            Speed::Normal => SwapSpeed::Normal,
        }
    }
}

#[derive(Debug, clap::Args)]
struct SwapArgs {
    #[arg(long, value_enum, default_value_t = Direction::LnToStarknet)]
    direction: Direction,

    #[arg(long)]
    amount: u64,

    #[arg(long)]
    target_token: Option<String>,

    #[arg(long)]
    recipient_address: Option<String>,

    /// Account the STARKNET_TO_LN deposit will be sent from.
    #[arg(long)]
    source_address: Option<String>,

    #[arg(long, value_enum)]
    speed: Option<Speed>,

    #[arg(long)]
    payout_invoice: Option<String>,
}

impl SwapArgs {
    fn body(&self) -> Value {
        json!({
          "direction": SwapDirection::from(self.direction),
          "amount": self.amount,
          "targetToken": self.target_token,
          "recipientAddress": self.recipient_address,
          "sourceAddress": self.source_address,
          "speed": self.speed.map(SwapSpeed::from),
          "payoutInvoice": self.payout_invoice,
        })
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Quote(SwapArgs),
    CreateSwap {
        #[command(flatten)]
        swap: SwapArgs,

        #[arg(long)]
        idempotency_key: Option<String>,
    },
    GetSwap {
        #[arg(long)]
        swap_id: String,
    },
    ListSwaps,
    VerifyPayment {
        #[arg(long)]
        payment_hash: String,
    },
    SubmitDeposit {
        #[arg(long)]
        swap_id: String,

        #[arg(long)]
        transaction_hash: String,
    },
    Config,
}

struct Api {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .context("this command needs --token or SWAP_API_TOKEN")?;
        Ok(req.bearer_auth(token))
    }

    async fn send(&self, what: &str, req: RequestBuilder) -> Result<Value> {
        let response = req.send().await.with_context(|| format!("{what}: send"))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{what}: decode response"))?;
        if !status.is_success() {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            anyhow::bail!("{what} failed: status={status} error={error}");
        }
        Ok(body)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_starknet_swap::logging::init().ok();
    let args = Args::parse();

    let api = Api {
        http: Client::new(),
        base_url: args.api_url,
        token: args.token,
    };

    let out = match args.command {
        Command::Quote(swap) => {
            let req = api.http.post(api.url("/lightning/quote")).json(&swap.body());
            api.send("quote", req).await?
        }
        Command::CreateSwap {
            swap,
            idempotency_key,
        } => {
            let mut req = api
                .authed(api.http.post(api.url("/lightning/swap")))?
                .json(&swap.body());
            if let Some(key) = idempotency_key {
                req = req.header("Idempotency-Key", key);
            }
            api.send("create swap", req).await?
        }
        Command::GetSwap { swap_id } => {
            let mut req = api.http.get(api.url(&format!("/lightning/swap/{swap_id}")));
            if let Some(token) = api.token.as_deref() {
                req = req.bearer_auth(token);
            }
            api.send("get swap", req).await?
        }
        Command::ListSwaps => {
            let req = api.authed(api.http.get(api.url("/lightning/swaps")))?;
            api.send("list swaps", req).await?
        }
        Command::VerifyPayment { payment_hash } => {
            let req = api
                .http
                .post(api.url("/lightning/verify-payment"))
                .json(&json!({ "paymentHash": payment_hash }));
            api.send("verify payment", req).await?
        }
        Command::SubmitDeposit {
            swap_id,
            transaction_hash,
        } => {
            let req = api
                .authed(
                    api.http
                        .post(api.url(&format!("/lightning/swap/{swap_id}/deposit"))),
                )?
                .json(&json!({ "transactionHash": transaction_hash }));
            api.send("submit deposit", req).await?
        }
        Command::Config => {
            let req = api.http.get(api.url("/lightning/config"));
            api.send("config", req).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
