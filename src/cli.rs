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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "octostudy")]
#[command(version, author = "Muvon Un Limited <opensource@muvon.io>")]
#[command(about = "Turn EPUB books into mind maps, study notes and summaries", long_about = None)]
pub struct Cli {
    /// Also write JSON logs to daily-rotated files in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process an EPUB into mind maps, explanation notes and summaries
    Process {
        /// Path to the EPUB file
        epub: PathBuf,

        /// Directory for generated artifacts
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Model id from the catalog (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// Mind map flavor: comprehensive, actionable, simple or all
        #[arg(short = 't', long, default_value = "comprehensive")]
        mindmap_type: String,

        /// Only process these chapters (comma-separated canonical names)
        #[arg(short, long)]
        chapters: Option<String>,

        /// Skip chapters shorter than this many characters
        #[arg(long)]
        min_length: Option<usize>,

        /// Include acknowledgements, glossary and similar back matter
        #[arg(long)]
        include_back_matter: bool,
    },

    /// List the chapters an EPUB would contribute, with classification
    Chapters {
        /// Path to the EPUB file
        epub: PathBuf,

        /// Skip chapters shorter than this many characters
        #[arg(long)]
        min_length: Option<usize>,

        /// Include acknowledgements, glossary and similar back matter
        #[arg(long)]
        include_back_matter: bool,
    },

    /// Show the model catalog with budgets and pricing
    Models,

    /// Show the resolved configuration and where it lives
    Config,
}
