//! The `show` subcommand: render a persisted playbook.

use anyhow::Context;
use clap::ArgMatches;

use ace_runtime::playbook::PlaybookDocument;

pub fn execute(matches: &ArgMatches) -> anyhow::Result<()> {
    let path = matches
        .get_one::<String>("playbook")
        .expect("playbook is required");
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let mut doc: PlaybookDocument =
        serde_json::from_str(&contents).with_context(|| format!("parsing {path}"))?;

    if let Some(filter) = matches.get_one::<String>("sections") {
        let wanted: Vec<&str> = filter.split(',').map(str::trim).collect();
        doc.sections.retain(|s| wanted.contains(&s.as_str()));
    }

    print!("{}", doc.render());
    eprintln!(
        "{} live bullets, {} tombstoned",
        doc.bullets.len(),
        doc.tombstones.len()
    );
    Ok(())
}
