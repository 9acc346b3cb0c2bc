use anyhow::{Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sftpcp",
    version,
    about = "Copy file trees to and from a remote host over SFTP",
    long_about = "`sftpcp` copies a file or a whole directory tree between the local host and a remote host \
over SFTP, skipping ignored paths and applying permission rules to the copied files.

EXAMPLE:
    # Upload a build, skipping its cache and making the launcher executable
    SFTPCP_PASSWORD=... sftpcp push --host example.com --user deploy --accept-any-host-key \\
        --ignore /srv/build/.cache --chmod /var/www/build/run.sh=755 /srv/build /var/www/build

    # Download logs
    sftpcp pull --host example.com --user deploy --host-key-fingerprint SHA256:... /var/log/app ./logs

Note: the contents of a source directory are copied into the destination directory \
(/srv/build/a -> /var/www/build/a), a single file lands in the destination directory under its own name."
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of blocking worker threads used for local file I/O, 0 means Tokio default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Copy a local file or directory tree to the remote host
    Push {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        copy: CopyArgs,
    },
    /// Copy a remote file or directory tree to the local host
    Pull {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        copy: CopyArgs,
    },
    /// Run a command on the remote host and print its output
    Exec {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Command line passed to the remote shell
        #[arg(value_name = "COMMAND")]
        command: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct ConnectionArgs {
    /// Remote host name or address
    #[arg(long, value_name = "HOST", help_heading = "Connection")]
    host: String,

    /// Remote SSH port
    #[arg(long, default_value_t = remote::config::DEFAULT_PORT, value_name = "PORT", help_heading = "Connection")]
    port: u16,

    /// User to authenticate as
    #[arg(short = 'u', long, value_name = "USER", help_heading = "Connection")]
    user: String,

    /// Password to authenticate with
    #[arg(
        long,
        env = "SFTPCP_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD",
        help_heading = "Connection"
    )]
    password: String,

    /// Give up connecting after this long
    ///
    /// This option accepts a human readable duration, e.g. "500ms", "10s", "1min" etc.
    #[arg(
        long,
        default_value = "30s",
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "Connection"
    )]
    connect_timeout: std::time::Duration,

    /// Accept any host key without verification
    ///
    /// INSECURE: the server's identity is not checked, so anyone able to intercept the connection
    /// can impersonate it and receive the password. A warning is logged for every connection.
    #[arg(
        long,
        conflicts_with = "host_key_fingerprint",
        required_unless_present = "host_key_fingerprint",
        help_heading = "Connection"
    )]
    accept_any_host_key: bool,

    /// Only accept a host key with this SHA-256 fingerprint, e.g. "SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8"
    #[arg(long, value_name = "FINGERPRINT", help_heading = "Connection")]
    host_key_fingerprint: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
struct CopyArgs {
    /// Source file or directory
    #[arg(value_name = "FROM")]
    from: String,

    /// Destination directory
    #[arg(value_name = "TO")]
    to: String,

    /// Source path to skip, compared exactly against the joined source paths (can be specified multiple times)
    ///
    /// Ignoring a directory skips everything below it. Ignoring the source itself makes the copy a no-op.
    #[arg(long, value_name = "PATH", action = clap::ArgAction::Append, help_heading = "Copy options")]
    ignore: Vec<String>,

    /// Set permissions of a copied file, e.g. "/var/www/run.sh=755" (can be specified multiple times)
    ///
    /// PATH is compared exactly against the destination path of each copied file. MODE is octal,
    /// with or without a leading zero, and must not exceed 777.
    #[arg(long, value_name = "PATH=MODE", value_parser = common::PermissionRule::parse, action = clap::ArgAction::Append, help_heading = "Copy options")]
    chmod: Vec<common::PermissionRule>,

    /// Fail the copy when reading or writing file contents fails
    ///
    /// By default such errors are logged and the file is left as far as it got: a failed read ends
    /// the file early and a failed write is skipped.
    #[arg(long, help_heading = "Copy options")]
    strict: bool,

    /// Size of the buffer file contents are streamed through
    ///
    /// This option accepts a human readable size, e.g. "10KiB", "1MB", "4096".
    #[arg(long, default_value = "10240", value_name = "SIZE", value_parser = parse_buffer_size, help_heading = "Copy options")]
    buffer_size: usize,
}

fn parse_buffer_size(size: &str) -> Result<usize> {
    let size = size
        .parse::<bytesize::ByteSize>()
        .map_err(|error| anyhow!("invalid size {size:?}: {error}"))?;
    let size = usize::try_from(size.as_u64())?;
    if size == 0 {
        return Err(anyhow!("buffer size must be greater than zero"));
    }
    Ok(size)
}

fn connection_parameters(args: &ConnectionArgs, buffer_size: usize) -> remote::ConnectionParameters {
    let mut params = remote::ConnectionParameters::new(&args.host, &args.user, &args.password);
    params.port = args.port;
    params.connect_timeout = args.connect_timeout;
    params.buffer_size = buffer_size;
    params.host_key_policy = match &args.host_key_fingerprint {
        Some(fingerprint) => remote::HostKeyPolicy::fingerprint(fingerprint),
        None => remote::HostKeyPolicy::AcceptAny,
    };
    params
}

enum Outcome {
    Copied(common::copy::Summary),
    Executed(remote::CommandOutput),
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Copied(summary) => write!(f, "{summary}"),
            Outcome::Executed(output) => write!(f, "exit status: {}", output.exit_status),
        }
    }
}

#[instrument(skip(connection, copy, print_summary))]
async fn copy_tree(
    direction: remote::Direction,
    connection: ConnectionArgs,
    copy: CopyArgs,
    print_summary: bool,
) -> Result<Outcome> {
    let params = connection_parameters(&connection, copy.buffer_size);
    let mut rules = copy.chmod;
    let ignores: common::IgnoreList = copy.ignore.into_iter().collect();
    let stream_errors = if copy.strict {
        common::copy::StreamErrors::Strict
    } else {
        common::copy::StreamErrors::Tolerant
    };
    match remote::transfer(
        direction,
        &params,
        &copy.from,
        &copy.to,
        &mut rules,
        &ignores,
        stream_errors,
    )
    .await
    {
        Ok(summary) => Ok(Outcome::Copied(summary)),
        Err(error) => {
            if print_summary {
                return Err(anyhow!("{}\n\n{}", error, &error.summary));
            }
            Err(anyhow!("{}", error))
        }
    }
}

async fn async_main(args: Args) -> Result<Outcome> {
    let print_summary = args.summary || args.verbose > 0;
    match args.command {
        Command::Push { connection, copy } => {
            copy_tree(remote::Direction::Push, connection, copy, print_summary).await
        }
        Command::Pull { connection, copy } => {
            copy_tree(remote::Direction::Pull, connection, copy, print_summary).await
        }
        Command::Exec {
            connection,
            command,
        } => {
            use tokio::io::AsyncWriteExt;
            let params = connection_parameters(&connection, common::copy::DEFAULT_BUFFER_SIZE);
            let output = remote::exec(&params, &command).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&output.stdout).await?;
            stdout.flush().await?;
            let mut stderr = tokio::io::stderr();
            stderr.write_all(&output.stderr).await?;
            stderr.flush().await?;
            Ok(Outcome::Executed(output))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
