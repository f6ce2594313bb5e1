use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mlua::Lua;
use tether_bridge::BridgeHost;

/// Run a Lua debug controller script against a fresh debuggee state.
///
/// The controller decides everything else: which debuggee scripts to
/// run, how to talk to a debug client, and when to stop.
#[derive(Parser)]
#[command(name = "tether", version, about = "In-process Lua debug bridge")]
struct Cli {
    /// Controller script implementing the debug callbacks
    controller: PathBuf,

    /// Extra `package.path` entries for the debuggee
    #[arg(long)]
    lua_path: Option<String>,

    /// Extra `package.cpath` entries for the debuggee
    #[arg(long)]
    lua_cpath: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The debug library is what makes a state debuggable at all; mlua
    // gates it behind unsafe because scripts can corrupt interpreter
    // internals through it.
    let debuggee = unsafe { Lua::unsafe_new() };

    let host = match BridgeHost::new(debuggee, &cli.controller) {
        Ok(host) => host,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.lua_path.is_some() || cli.lua_cpath.is_some() {
        if let Err(err) =
            host.add_search_paths(cli.lua_path.as_deref(), cli.lua_cpath.as_deref())
        {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = host.handle_request() {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
