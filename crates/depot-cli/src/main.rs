use clap::Parser;
use cli::{Args, Commands};
use context::{create_context, load_config, resolve_config_path};
use depot_config::config::{generate_default_config, Config};
use logging::setup_logging;
use miette::Result;
use tracing::info;

mod cli;
mod context;
mod exec;
mod logging;
mod progress;
mod query;
mod utils;

fn handle_cli() -> Result<()> {
    let args = Args::parse();

    if args.no_color {
        utils::disable_color();
    }
    if args.no_progress || args.json || args.quiet {
        utils::disable_progress();
    }
    setup_logging(&args);

    if let Commands::Config {
        init,
    } = args.command
    {
        if init {
            generate_default_config(resolve_config_path(&args))?;
        } else {
            let config: Config = load_config(&args)?;
            let doc = config.to_annotated_document()?;
            info!("{doc}");
        }
        return Ok(());
    }

    let (mut ctx, progress_guard) = create_context(&load_config(&args)?)?;

    let result = match &args.command {
        Commands::Show {
            package,
            all,
            any_stability,
        } => query::show(&ctx, package, *all, *any_stability, args.json),
        Commands::Audit {
            packages,
            allow_partial,
        } => query::audit(&ctx, packages, *allow_partial, args.json),
        Commands::Providers {
            name,
        } => query::providers(&ctx, name, args.json),
        Commands::Resolve {
            packages,
        } => query::resolve(&mut ctx, packages, args.json),
        Commands::Exec {
            commands,
        } => exec::exec(&ctx, commands),
        Commands::Config {
            ..
        } => Ok(()),
    };

    // the context owns the event senders; the renderer stops once they drop
    drop(ctx);
    if let Some(guard) = progress_guard {
        guard.finish();
    }
    result
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    handle_cli()
}
