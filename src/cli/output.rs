//! Output formatting module for Steward
//!
//! Human output is printed per play and per host once the play has run,
//! since hosts run in parallel. JSON and YAML print the whole report.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;

use super::OutputFormat;
use steward::report::{HostReport, HostStats, RunReport, TaskReport, TaskStatus};

/// Output formatter for different output modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbosity: u8,
}

fn status_label(task: &TaskReport) -> ColoredString {
    match task.status {
        TaskStatus::Unchanged => "ok".green(),
        TaskStatus::Changed => "changed".yellow(),
        TaskStatus::Skipped => "skipping".cyan(),
        TaskStatus::Failed if task.ignored => "failed (ignored)".blue(),
        TaskStatus::Failed => "failed".red().bold(),
    }
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, format: OutputFormat, verbosity: u8) -> Self {
        if !use_color {
            colored::control::set_override(false);
        }
        Self { format, verbosity }
    }

    /// Print a value in the machine format, or `human` otherwise
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
            OutputFormat::Human => human(),
        }
        Ok(())
    }

    /// Print a play header
    pub fn play_header(&self, play_name: &str) {
        let header = format!("PLAY [{}]", play_name);
        let stars = "*".repeat(80_usize.saturating_sub(header.len()));
        println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
    }

    fn host_section(&self, host: &HostReport) {
        println!("\n{}", format!("HOST [{}]", host.host).bright_white().bold());
        for task in &host.tasks {
            let name = if task.handler {
                format!("{} (handler)", task.task)
            } else {
                task.task.clone()
            };
            print!("{}: [{}]", status_label(task), name);
            if task.is_failed() || (self.verbosity > 0 && !task.msg.is_empty()) {
                print!(" => {}", task.msg);
            }
            println!();

            if self.verbosity > 0 {
                if let Some(details) = task.diff.as_ref().and_then(|d| d.details.as_deref()) {
                    for line in details.lines() {
                        println!("    {}", colorize_diff_line(line));
                    }
                }
            }
        }
        if let Some(error) = &host.error {
            println!("{}: {}", "aborted".red().bold(), error);
        }
    }

    /// Print a run report in the configured format
    pub fn report(&self, report: &RunReport) -> Result<()> {
        self.emit(report, || {
            if report.check_mode {
                self.warning("Ran in CHECK MODE - no changes were made");
            }
            for play in &report.plays {
                self.play_header(&play.name);
                if play.hosts.is_empty() {
                    println!("{}", "skipping: no hosts matched".cyan());
                }
                for host in &play.hosts {
                    self.host_section(host);
                }
            }
            self.recap(report);
        })
    }

    /// Print the recap summary
    fn recap(&self, report: &RunReport) {
        println!("\n{} {}", "PLAY RECAP".bright_white().bold(), "*".repeat(69).bright_black());

        for (host, stats) in report.summary() {
            println!("{:<30} : {}", host_label(&host, &stats), stats_line(&stats));
        }
        if let Some(duration) = report.duration() {
            println!(
                "\n{}",
                format!("Finished in {:.2}s", duration.num_milliseconds() as f64 / 1000.0).bright_black()
            );
        }
        if report.cancelled {
            self.warning("Run was cancelled");
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "[WARNING]".yellow().bold(), message);
    }
}

fn host_label(host: &str, stats: &HostStats) -> ColoredString {
    if stats.failed > 0 || stats.aborted > 0 {
        host.red().bold()
    } else if stats.changed > 0 {
        host.yellow()
    } else {
        host.green()
    }
}

fn stats_line(stats: &HostStats) -> String {
    format!(
        "{}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4}",
        "ok".green(),
        stats.unchanged,
        "changed".yellow(),
        stats.changed,
        "failed".red(),
        stats.failed,
        "skipped".cyan(),
        stats.skipped,
        "ignored".blue(),
        stats.ignored,
        "aborted".red(),
        stats.aborted,
    )
}

fn colorize_diff_line(line: &str) -> ColoredString {
    if line.starts_with('+') && !line.starts_with("+++") {
        line.green()
    } else if line.starts_with('-') && !line.starts_with("---") {
        line.red()
    } else if line.starts_with("@@") {
        line.cyan()
    } else {
        line.normal()
    }
}
