use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lanproxy")]
#[command(about = "Expose a local web server on the LAN through a reverse proxy", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Port of the local application to forward to [default: 8887]
    #[arg(short, long, allow_negative_numbers = true)]
    pub internal: Option<i64>,

    /// Port to listen on; the next free port above it is used if taken [default: 5000]
    #[arg(short, long, allow_negative_numbers = true)]
    pub external: Option<i64>,

    /// Ask the proxy engine to rewrite Host headers to the internal address
    #[arg(long)]
    pub rewrite_host_headers: bool,

    /// Proxy engine program (default: socat)
    #[arg(long, value_name = "PROGRAM")]
    pub engine: Option<String>,

    /// Argument for the proxy engine, may contain {external} and {internal}
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Settings file [default: ~/.config/lanproxy/config.json]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep running when stdin closes; stop only on a signal
    #[arg(long)]
    pub no_stdin: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}
