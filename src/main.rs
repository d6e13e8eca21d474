/*
 *  main.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info, warn};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, interval_at};

use deejdsp::bitmap::convert_path;
use deejdsp::bus::{CommandBus, SerialTransport};
use deejdsp::config::{self, Cli, Command, Config};
use deejdsp::controller::DisplayController;
use deejdsp::modules::Modules;
use deejdsp::sessions::ConfigSessions;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

type Controller = DisplayController<SerialTransport>;

/// Log whatever the controller says on its own (slider values, boot
/// chatter) while no session owns the line stream
fn spawn_line_logger(mut lines: mpsc::UnboundedReceiver<String>) {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            debug!("< {}", line);
        }
        debug!("background line stream closed");
    });
}

async fn refresh(controller: &mut Controller) {
    match controller.refresh().await {
        Ok(report) if !report.failed.is_empty() => {
            warn!("refresh: {} display(s) failed, retrying next pass", report.failed.len());
        }
        Ok(report) => debug!("refresh: {:?}", report),
        Err(e) => error!("refresh aborted: {}", e),
    }
}

fn ticker(config: &Config) -> Interval {
    let period = config.refresh_interval();
    interval_at(Instant::now() + period, period)
}

/// Keep the displays in step with the mapping until SIGINT/SIGTERM.
/// SIGHUP re-reads the configuration.
async fn run(
    mut controller: Controller,
    cli: &Cli,
    config_tx: watch::Sender<Arc<Config>>,
) -> anyhow::Result<()> {
    let mut sigint: Signal = signal(SignalKind::interrupt())?;
    let mut sigterm: Signal = signal(SignalKind::terminate())?;
    let mut sighup: Signal = signal(SignalKind::hangup())?;

    let mut reloads = config_tx.subscribe();
    let mut ticks = ticker(&reloads.borrow_and_update());

    refresh(&mut controller).await;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("SIGINT received. Initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received. Initiating graceful shutdown.");
                break;
            }
            _ = sighup.recv() => {
                info!("SIGHUP received. Reloading configuration.");
                match config::load(cli) {
                    Ok(cfg) => { config_tx.send_replace(Arc::new(cfg)); }
                    Err(e) => error!("reload failed, keeping current configuration: {}", e),
                }
            }
            Ok(()) = reloads.changed() => {
                let next = ticker(&reloads.borrow_and_update());
                if next.period() != ticks.period() {
                    ticks = next;
                }
                refresh(&mut controller).await;
            }
            _ = ticks.tick() => {
                refresh(&mut controller).await;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(if cli.verbose {"debug"} else {"info"}))
        .format_timestamp_secs()
        .init();

    info!("{} v.{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let cfg = config::load(&cli).context("loading configuration")?;
    if cli.dump_config {
        println!("{}", config::dump(&cfg)?);
        return Ok(());
    }

    let command = cli.command.clone().unwrap_or(Command::Run);

    // no hardware needed
    if let Command::Convert { image, out } = &command {
        let packed = convert_path(image, cfg.threshold())
            .with_context(|| format!("converting {}", image.display()))?;
        packed.write_to(out)?;
        info!("Wrote {} bytes to {}", packed.len(), out.display());
        return Ok(());
    }

    let settings = cfg.port_settings();
    let (transport, background) = SerialTransport::open(&settings)
        .with_context(|| format!("opening {}", settings.path))?;
    spawn_line_logger(background);

    // give the controller time to boot after the port opens
    tokio::time::sleep(cfg.startup_delay()).await;

    let bus = CommandBus::new(Arc::new(transport));
    let mods = Modules::new(&bus, &cfg);
    let (config_tx, config_rx) = watch::channel(Arc::new(cfg));
    let sessions = Arc::new(ConfigSessions::new(config_rx.clone()));
    let mut controller = DisplayController::new(bus, config_rx, sessions.clone(), sessions);

    match command {
        Command::Run => run(controller, &cli, config_tx).await?,
        Command::List => {
            for name in mods.sd.list().await.context("listing SD card")? {
                println!("{}", name);
            }
        }
        Command::Send { file, name } => {
            let sent = mods
                .sd
                .send_file(&file, name.as_deref())
                .await
                .with_context(|| format!("sending {}", file.display()))?;
            info!("{} is on the SD card as {}", file.display(), sent);
        }
        Command::Delete { name } => {
            mods.sd.delete(&name).await.with_context(|| format!("deleting {}", name))?;
        }
        Command::Off => {
            let report = controller.all_off().await;
            if !report.failed.is_empty() {
                bail!("displays {:?} did not turn off", report.failed);
            }
        }
        Command::Reload => {
            let report = controller.reload().await.context("refreshing displays")?;
            if !report.failed.is_empty() {
                bail!("displays {:?} failed to update", report.failed);
            }
            info!("{} display(s) updated", report.changed.len());
        }
        Command::Convert { .. } => {}
    }
    Ok(())
}
