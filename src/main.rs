// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, registry::Registry, EnvFilter};

mod analysis;
mod cli;
mod commands;
mod config;
mod epub;
mod jobs;
mod llm;
mod storage;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref())?;

    let config = Config::load()?;

    if let Err(e) = commands::execute(&config, cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Console logging, plus a daily-rotating JSON file layer when a log
/// directory was requested.
fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("octostudy=info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "octostudy.log");
            let file_layer = fmt::Layer::new()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .json();
            let console_layer = fmt::Layer::new().with_target(false);
            Registry::default()
                .with(filter)
                .with(file_layer)
                .with(console_layer)
                .init();
        }
        None => fmt().with_env_filter(filter).with_target(false).init(),
    }

    Ok(())
}
