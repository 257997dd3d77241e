use console::style;
use dialoguer::{theme::ColorfulTheme, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("✖").red(), msg);
}

pub fn info(msg: &str) {
    println!("  {}", msg);
}

pub fn dim(msg: &str) -> String {
    style(msg).dim().to_string()
}

/// Masked prompt for an account token.
pub fn prompt_token(prompt: &str) -> anyhow::Result<String> {
    let value = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact()?;
    Ok(value)
}

pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
