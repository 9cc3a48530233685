use anyhow::Result;
use clap::{Parser, Subcommand};
use embedq_client::EmbedqClient;

#[derive(Parser, Debug)]
#[command(name = "embedq-client", about = "Publish to or subscribe on an embedq broker")]
struct Cli {
    #[arg(long, env = "EMBEDQ_URL", default_value = "nats://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish one message.
    Pub { subject: String, message: String },
    /// Print messages as they arrive.
    Sub {
        subject: String,
        #[arg(long)]
        queue: Option<String>,
        /// Exit after this many messages.
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = EmbedqClient::connect(&cli.url).await?;

    match cli.command {
        Command::Pub { subject, message } => {
            client.publish(&subject, message.as_bytes()).await?;
            client.flush().await?;
        }
        Command::Sub { subject, queue, count } => {
            match queue {
                Some(q) => client.queue_subscribe(&subject, &q).await?,
                None => client.subscribe(&subject).await?,
            };
            let mut received = 0;
            while count.map_or(true, |c| received < c) {
                let msg = client.next_message().await?;
                println!("[{}] {}", msg.subject, String::from_utf8_lossy(&msg.payload));
                received += 1;
            }
        }
    }
    client.close().await
}
