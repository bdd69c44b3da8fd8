//! Administrative rig commands and their remote script templates
//!
//! The scripts shipped here follow the stock rig layout (Earth client under
//! `~/earth`, staged KML served from `/var/www/html`). Deployments with a different
//! layout override individual templates in the settings file.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::config::ClusterConfig;
use super::topology::NodeAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigCommand {
    /// Turn on periodic re-sync of displayed content
    SetRefresh,
    /// Turn periodic re-sync off again
    ResetRefresh,
    /// Empty node-local staged KML
    ClearStagedContent,
    /// Restart the visualization process only
    Relaunch,
    /// Reboot the node
    Restart,
    /// Power the node off
    Shutdown,
}

impl RigCommand {
    pub const ALL: [RigCommand; 6] = [
        RigCommand::SetRefresh,
        RigCommand::ResetRefresh,
        RigCommand::ClearStagedContent,
        RigCommand::Relaunch,
        RigCommand::Restart,
        RigCommand::Shutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RigCommand::SetRefresh => "set_refresh",
            RigCommand::ResetRefresh => "reset_refresh",
            RigCommand::ClearStagedContent => "clear_staged_content",
            RigCommand::Relaunch => "relaunch",
            RigCommand::Restart => "restart",
            RigCommand::Shutdown => "shutdown",
        }
    }

    /// The node goes away as a result of this command, so a dropped session while
    /// it runs means it took effect.
    pub fn drops_session(&self) -> bool {
        matches!(self, RigCommand::Restart | RigCommand::Shutdown)
    }
}

impl fmt::Display for RigCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RigCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RigCommand::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown rig command '{}'", s))
    }
}

const MYPLACES: &str = "~/earth/kml/slave/myplaces.kml";
const REFRESH_TAGS: &str =
    "<refreshMode>onInterval<\\/refreshMode><refreshInterval>[0-9]*<\\/refreshInterval>";

/// Per-command script templates
///
/// Placeholders: `{index}`, `{screen}` (index + 1), `{node_count}`, `{role}`, `{host}`,
/// `{username}` and `{credential}`. `{credential}` is substituted shell-quoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplates {
    /// Template run on every node
    #[serde(default = "default_templates")]
    pub nodes: BTreeMap<RigCommand, String>,

    /// Replaces `nodes` on the primary when present
    #[serde(default = "default_primary_templates")]
    pub primary: BTreeMap<RigCommand, String>,
}

fn default_templates() -> BTreeMap<RigCommand, String> {
    let mut t = BTreeMap::new();
    t.insert(
        RigCommand::SetRefresh,
        format!(
            "sed -i -e 's/{tags}//g' -e 's/\\(<href>##LG_PHPIFACE##kml\\/slave_{{screen}}.kml<\\/href>\\)/\\1<refreshMode>onInterval<\\/refreshMode><refreshInterval>2<\\/refreshInterval>/' {file}",
            tags = REFRESH_TAGS,
            file = MYPLACES
        ),
    );
    t.insert(
        RigCommand::ResetRefresh,
        format!("sed -i -e 's/{}//g' {}", REFRESH_TAGS, MYPLACES),
    );
    t.insert(
        RigCommand::ClearStagedContent,
        "echo '<?xml version=\"1.0\" encoding=\"UTF-8\"?><kml xmlns=\"http://www.opengis.net/kml/2.2\"><Document></Document></kml>' > /var/www/html/kml/slave_{screen}.kml"
            .to_string(),
    );
    t.insert(
        RigCommand::Relaunch,
        "pkill -f googleearth-bin; (sleep 2; DISPLAY=:0 nohup bash ~/earth/scripts/launch-earth.sh > /dev/null 2>&1) > /dev/null 2>&1 &"
            .to_string(),
    );
    t.insert(
        RigCommand::Restart,
        "(sleep 1; echo {credential} | sudo -S reboot) > /dev/null 2>&1 &".to_string(),
    );
    t.insert(
        RigCommand::Shutdown,
        "(sleep 1; echo {credential} | sudo -S poweroff) > /dev/null 2>&1 &".to_string(),
    );
    t
}

fn default_primary_templates() -> BTreeMap<RigCommand, String> {
    let mut t = BTreeMap::new();
    t.insert(
        RigCommand::ClearStagedContent,
        "echo '' > /var/www/html/kmls.txt".to_string(),
    );
    t
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            nodes: default_templates(),
            primary: default_primary_templates(),
        }
    }
}

/// Wrap `value` in single quotes for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

impl CommandTemplates {
    /// Override the template used on every node
    pub fn set(&mut self, command: RigCommand, template: impl Into<String>) {
        self.nodes.insert(command, template.into());
    }

    /// Template for `command` on `node`, None if the command has no script
    pub fn template(&self, command: RigCommand, node: &NodeAddress) -> Option<&str> {
        if node.is_primary() {
            if let Some(t) = self.primary.get(&command) {
                return Some(t);
            }
        }
        self.nodes.get(&command).map(String::as_str)
    }

    /// Render the script for `command` on `node`
    pub fn render(
        &self,
        command: RigCommand,
        node: &NodeAddress,
        config: &ClusterConfig,
    ) -> Option<String> {
        let template = self.template(command, node)?;
        Some(
            template
                .replace("{index}", &node.index.to_string())
                .replace("{screen}", &node.screen().to_string())
                .replace("{node_count}", &config.node_count.to_string())
                .replace("{role}", &node.role.to_string())
                .replace("{host}", &node.host)
                .replace("{username}", &config.username)
                .replace("{credential}", &shell_quote(&config.credential)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::topology::{build_topology, NumberedSuffix};

    fn nodes() -> (ClusterConfig, Vec<NodeAddress>) {
        let config = ClusterConfig::new("lg", "it's", "10.0.0.1", 22, 3);
        let nodes = build_topology(&config, &NumberedSuffix).unwrap();
        (config, nodes)
    }

    #[test]
    fn test_every_command_has_a_default_script() {
        let (config, nodes) = nodes();
        let templates = CommandTemplates::default();
        for command in RigCommand::ALL {
            for node in &nodes {
                assert!(
                    templates.render(command, node, &config).is_some(),
                    "{command} on {node}"
                );
            }
        }
    }

    #[test]
    fn test_render_placeholders() {
        let (config, nodes) = nodes();
        let templates = CommandTemplates::default();

        let script = templates
            .render(RigCommand::ClearStagedContent, &nodes[2], &config)
            .unwrap();
        assert!(script.contains("slave_3.kml"));

        let script = templates
            .render(RigCommand::ClearStagedContent, &nodes[0], &config)
            .unwrap();
        assert!(script.contains("kmls.txt"));

        let script = templates
            .render(RigCommand::Restart, &nodes[1], &config)
            .unwrap();
        assert!(script.contains(r"echo 'it'\''s' | sudo -S reboot"));
    }

    #[test]
    fn test_override_template() {
        let (config, nodes) = nodes();
        let mut templates = CommandTemplates::default();
        templates.set(RigCommand::Relaunch, "lg-relaunch {index}/{node_count} {role}");

        let script = templates.render(RigCommand::Relaunch, &nodes[1], &config).unwrap();
        assert_eq!(script, "lg-relaunch 1/3 secondary");
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            "clear-staged-content".parse::<RigCommand>(),
            Ok(RigCommand::ClearStagedContent)
        );
        assert_eq!("Relaunch".parse::<RigCommand>(), Ok(RigCommand::Relaunch));
        assert!("format_disk".parse::<RigCommand>().is_err());
    }

    #[test]
    fn test_templates_serde_uses_command_names() {
        let json = serde_json::to_value(CommandTemplates::default()).unwrap();
        assert!(json["nodes"]["clear_staged_content"].is_string());
        assert!(json["primary"]["clear_staged_content"].is_string());
    }
}
