// ABOUTME: Resolves a requested backend mode to a concrete backend
// ABOUTME: Auto prefers panes only inside an interactive multiplexer session

use crew_core::{BackendKind, BackendMode};

/// Resolve the requested mode against the environment. Auto picks
/// MultiplexedPane only when the caller is interactive and a multiplexer
/// session is already active; otherwise it falls back to IsolatedProcess.
/// Explicit modes pass through unchanged.
pub fn resolve_backend(
    mode: BackendMode,
    interactive: bool,
    multiplexer_present: bool,
) -> BackendKind {
    match mode {
        BackendMode::Pane => BackendKind::MultiplexedPane,
        BackendMode::Process => BackendKind::IsolatedProcess,
        BackendMode::Hub => BackendKind::SharedHub,
        BackendMode::Auto => {
            if interactive && multiplexer_present {
                BackendKind::MultiplexedPane
            } else {
                BackendKind::IsolatedProcess
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_picks_pane_only_when_interactive_and_in_multiplexer() {
        assert_eq!(
            resolve_backend(BackendMode::Auto, true, true),
            BackendKind::MultiplexedPane
        );
        assert_eq!(
            resolve_backend(BackendMode::Auto, true, false),
            BackendKind::IsolatedProcess
        );
        assert_eq!(
            resolve_backend(BackendMode::Auto, false, true),
            BackendKind::IsolatedProcess
        );
        assert_eq!(
            resolve_backend(BackendMode::Auto, false, false),
            BackendKind::IsolatedProcess
        );
    }

    #[test]
    fn explicit_modes_pass_through() {
        assert_eq!(
            resolve_backend(BackendMode::Pane, false, false),
            BackendKind::MultiplexedPane
        );
        assert_eq!(
            resolve_backend(BackendMode::Process, true, true),
            BackendKind::IsolatedProcess
        );
        assert_eq!(
            resolve_backend(BackendMode::Hub, true, true),
            BackendKind::SharedHub
        );
    }
}
