//! `ipasign tools`: report where each external tool was found.

use anyhow::Result;
use console::style;

use ipasign_core::tools::{Tool, ToolLocator};

use super::AppContext;

pub fn handle_tools_command(ctx: &AppContext) -> Result<()> {
    for line in tool_report(&ctx.locator) {
        println!("{}", line);
    }
    Ok(())
}

fn tool_report(locator: &ToolLocator) -> Vec<String> {
    Tool::ALL
        .iter()
        .map(|tool| match locator.locate(*tool) {
            Some(path) => format!(
                "{} {:<18} {}",
                style("✓").green(),
                tool.as_str(),
                path.display()
            ),
            None => format!(
                "{} {:<18} {}",
                style("✗").red(),
                tool.as_str(),
                style(tool.remediation()).dim()
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lists_every_tool() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("zip");
        std::fs::write(&zip, b"").unwrap();

        let locator = ToolLocator::empty().with_candidates(Tool::Zip, vec![zip.clone()]);
        let report = tool_report(&locator);

        assert_eq!(report.len(), Tool::ALL.len());
        let line = |tool: Tool| &report[Tool::ALL.iter().position(|t| *t == tool).unwrap()];
        assert!(line(Tool::Zip).contains(&zip.display().to_string()));
        assert!(line(Tool::Brew).contains("Install Homebrew"));
    }
}
