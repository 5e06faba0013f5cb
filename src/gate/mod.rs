//! Mode gate: which tools may run in which access mode.
//!
//! The table is static. Decisions depend only on the tool name and the mode.

use crate::provider::ToolDefinition;
use crate::tools::ToolKind;
use crate::types::Mode;

const READ_MODES: &[Mode] = &[Mode::Chat, Mode::Agent];
const WRITE_MODES: &[Mode] = &[Mode::Agent];

/// Capability table: tool → modes it may execute in.
const CAPABILITIES: [(ToolKind, &[Mode]); 9] = [
    (ToolKind::ReadContentList, READ_MODES),
    (ToolKind::ReadContent, READ_MODES),
    (ToolKind::ReadSection, READ_MODES),
    (ToolKind::ReadSourceList, READ_MODES),
    (ToolKind::ReadSource, READ_MODES),
    (ToolKind::ReadWorkspaceSummary, READ_MODES),
    (ToolKind::ContentWrite, WRITE_MODES),
    (ToolKind::EditSection, WRITE_MODES),
    (ToolKind::SourceIngest, WRITE_MODES),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ModeGate;

impl ModeGate {
    /// Modes a tool may run in. Unknown tools run in none.
    pub fn permitted_modes(tool_name: &str) -> &'static [Mode] {
        CAPABILITIES
            .iter()
            .find(|(kind, _)| kind.name() == tool_name)
            .map(|(_, modes)| *modes)
            .unwrap_or(&[])
    }

    pub fn is_allowed(tool_name: &str, mode: Mode) -> bool {
        Self::permitted_modes(tool_name).contains(&mode)
    }

    /// Fixed text returned to the model when a tool is denied.
    pub fn denial_message(tool_name: &str) -> String {
        let modes = Self::permitted_modes(tool_name);
        if modes.is_empty() {
            format!("The {tool_name} tool is not available.")
        } else if !modes.contains(&Mode::Chat) {
            format!(
                "The {tool_name} tool changes your workspace, so it is only available in agent mode. Switch to agent mode to let me make this change."
            )
        } else {
            format!("The {tool_name} tool is not available in this mode.")
        }
    }

    /// Tools a mode may execute, in catalog order.
    pub fn permitted_tools(mode: Mode) -> Vec<ToolKind> {
        CAPABILITIES
            .iter()
            .filter(|(_, modes)| modes.contains(&mode))
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Tool definitions advertised to the model for a mode.
    pub fn definitions(mode: Mode) -> Vec<ToolDefinition> {
        Self::permitted_tools(mode)
            .iter()
            .map(ToolKind::definition)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolFamily;

    #[test]
    fn every_catalog_tool_has_a_capability_row() {
        for kind in ToolKind::ALL {
            assert!(
                !ModeGate::permitted_modes(kind.name()).is_empty(),
                "{kind} missing from capability table"
            );
        }
    }

    #[test]
    fn chat_mode_permits_only_read_family() {
        for kind in ToolKind::ALL {
            let allowed = ModeGate::is_allowed(kind.name(), Mode::Chat);
            assert_eq!(allowed, kind.family() == ToolFamily::Read, "{kind}");
            assert!(ModeGate::is_allowed(kind.name(), Mode::Agent), "{kind}");
        }
    }

    #[test]
    fn unknown_tools_are_denied_everywhere() {
        assert!(!ModeGate::is_allowed("shell_exec", Mode::Agent));
        assert_eq!(
            ModeGate::denial_message("shell_exec"),
            "The shell_exec tool is not available."
        );
    }

    #[test]
    fn denial_message_is_fixed_per_tool() {
        assert_eq!(
            ModeGate::denial_message("edit_section"),
            "The edit_section tool changes your workspace, so it is only available in agent mode. Switch to agent mode to let me make this change."
        );
        assert_eq!(
            ModeGate::denial_message("edit_section"),
            ModeGate::denial_message("edit_section")
        );
    }

    #[test]
    fn chat_definitions_exclude_write_tools() {
        let names: Vec<String> = ModeGate::definitions(Mode::Chat)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names.len(), 6);
        assert!(!names.iter().any(|n| n == "content_write"));
        assert_eq!(ModeGate::definitions(Mode::Agent).len(), 9);
    }
}
