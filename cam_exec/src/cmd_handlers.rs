//! # Command handlers
//!
//! The handlers registered on the command side channel. Each reply is a single `\r\n` terminated
//! line.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::Write;
use std::sync::Arc;

use comms_if::cmd::{
    table::{reply, STATUS_BAD_ARGS, STATUS_IO_ERROR, STATUS_OK},
    Arguments, CommandHandler, CommandTable, CommandTableError,
};
use log::{info, warn};

use crate::{
    context::PipelineContext,
    stats::{CameraSettings, PipelineStats},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// `ping-camera`: liveness check.
pub struct PingHandler;

/// `stats`: the statistics report as one line of JSON.
pub struct StatsHandler {
    stats: Arc<PipelineStats>,
    settings: Arc<CameraSettings>,
}

/// `get-name`: the camera name.
pub struct GetNameHandler {
    settings: Arc<CameraSettings>,
}

/// `set-name <name>`: change the camera name, quote names containing spaces.
pub struct SetNameHandler {
    settings: Arc<CameraSettings>,
}

/// `set-quality <1-100>`: change the compression quality.
pub struct SetQualityHandler {
    settings: Arc<CameraSettings>,
}

/// `help`: list the available commands.
pub struct HelpHandler {
    mnemonics: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CommandHandler for PingHandler {
    fn handle(&self, _line: &str, _args_start: usize, out: &mut dyn Write) -> i32 {
        reply(out, "pong-camera\r\n", STATUS_OK)
    }
}

impl CommandHandler for StatsHandler {
    fn handle(&self, _line: &str, _args_start: usize, out: &mut dyn Write) -> i32 {
        let report = self.stats.snapshot(&self.settings);

        match serde_json::to_string(&report) {
            Ok(json) => reply(out, &format!("{}\r\n", json), STATUS_OK),
            Err(e) => {
                warn!("Could not serialise the statistics: {}", e);
                STATUS_IO_ERROR
            }
        }
    }
}

impl CommandHandler for GetNameHandler {
    fn handle(&self, _line: &str, _args_start: usize, out: &mut dyn Write) -> i32 {
        reply(out, &format!("{}\r\n", self.settings.name()), STATUS_OK)
    }
}

impl CommandHandler for SetNameHandler {
    fn handle(&self, line: &str, args_start: usize, out: &mut dyn Write) -> i32 {
        // Lines with an unterminated quote are rejected before reaching the handler
        let name = match Arguments::new(line, args_start).next() {
            Some(l) => l.text,
            None => return reply(out, "error: missing name\r\n", STATUS_BAD_ARGS),
        };

        info!("Camera name set to {:?}", name);
        self.settings.set_name(&name);
        reply(out, "ok\r\n", STATUS_OK)
    }
}

impl CommandHandler for SetQualityHandler {
    fn handle(&self, line: &str, args_start: usize, out: &mut dyn Write) -> i32 {
        let quality = match Arguments::new(line, args_start)
            .next()
            .and_then(|l| l.text.parse::<u8>().ok())
        {
            Some(q) => q,
            None => return reply(out, "error: expected a quality from 1 to 100\r\n", STATUS_BAD_ARGS),
        };

        match self.settings.set_quality(quality) {
            Ok(()) => {
                info!("Quality set to {}", quality);
                reply(out, "ok\r\n", STATUS_OK)
            }
            Err(e) => reply(out, &format!("error: {}\r\n", e), STATUS_BAD_ARGS),
        }
    }
}

impl CommandHandler for HelpHandler {
    fn handle(&self, _line: &str, _args_start: usize, out: &mut dyn Write) -> i32 {
        reply(out, &format!("{}\r\n", self.mnemonics.join(" ")), STATUS_OK)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the command table of the camera.
pub fn build_command_table(ctx: &PipelineContext) -> Result<CommandTable, CommandTableError> {
    let mut table = CommandTable::new();

    table.register("ping-camera", PingHandler)?;
    table.register(
        "stats",
        StatsHandler {
            stats: ctx.stats.clone(),
            settings: ctx.settings.clone(),
        },
    )?;
    table.register(
        "get-name",
        GetNameHandler {
            settings: ctx.settings.clone(),
        },
    )?;
    table.register(
        "set-name",
        SetNameHandler {
            settings: ctx.settings.clone(),
        },
    )?;
    table.register(
        "set-quality",
        SetQualityHandler {
            settings: ctx.settings.clone(),
        },
    )?;

    let mut mnemonics: Vec<String> = table.mnemonics().iter().map(|m| m.to_string()).collect();
    mnemonics.push("help".into());
    mnemonics.sort();
    table.register("help", HelpHandler { mnemonics })?;

    Ok(table)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{pool::FramePool, queue::HandoffQueue, shutdown::ShutdownToken};
    use comms_if::cmd::DispatchOutcome;
    use comms_if::eqpt::cam::StatsReport;

    fn context() -> PipelineContext {
        PipelineContext::from_parts(
            FramePool::new(1, 1, 1).unwrap(),
            HandoffQueue::new(1).unwrap(),
            CameraSettings::new("Mast", 10),
            ShutdownToken::new(),
        )
    }

    fn run(table: &CommandTable, line: &str) -> (DispatchOutcome, String) {
        let mut out = Vec::new();
        let outcome = table.dispatch(line, &mut out);
        (outcome, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_ping() {
        let table = build_command_table(&context()).unwrap();
        assert_eq!(
            run(&table, "ping-camera"),
            (DispatchOutcome::Handled(STATUS_OK), "pong-camera\r\n".into())
        );
    }

    #[test]
    fn test_names() {
        let ctx = context();
        let table = build_command_table(&ctx).unwrap();

        assert_eq!(run(&table, "get-name").1, "Mast\r\n");
        assert_eq!(run(&table, "set-name \"Front Cam\"").1, "ok\r\n");
        assert_eq!(ctx.settings.name(), "Front Cam");
        assert_eq!(run(&table, "get-name").1, "Front Cam\r\n");

        assert_eq!(
            run(&table, "set-name"),
            (
                DispatchOutcome::Handled(STATUS_BAD_ARGS),
                "error: missing name\r\n".into()
            )
        );
        assert_eq!(
            run(&table, "set-name \"Front"),
            (DispatchOutcome::Malformed("set-name".into()), String::new())
        );
        assert_eq!(ctx.settings.name(), "Front Cam");
    }

    #[test]
    fn test_set_quality() {
        let ctx = context();
        let table = build_command_table(&ctx).unwrap();

        assert_eq!(run(&table, "set-quality 42").1, "ok\r\n");
        assert_eq!(ctx.settings.quality(), 42);

        assert_eq!(
            run(&table, "set-quality 0").0,
            DispatchOutcome::Handled(STATUS_BAD_ARGS)
        );
        assert_eq!(
            run(&table, "set-quality loud").0,
            DispatchOutcome::Handled(STATUS_BAD_ARGS)
        );
        assert_eq!(
            run(&table, "set-quality \"42"),
            (DispatchOutcome::Malformed("set-quality".into()), String::new())
        );
        assert_eq!(
            run(&table, "set-quality \"17"),
            (DispatchOutcome::Malformed("set-quality".into()), String::new())
        );
        assert_eq!(ctx.settings.quality(), 42);
    }

    #[test]
    fn test_stats_and_help() {
        let ctx = context();
        let table = build_command_table(&ctx).unwrap();
        PipelineStats::incr(&ctx.stats.frames_published);

        let (_, out) = run(&table, "stats");
        assert!(out.ends_with("\r\n"));
        let report: StatsReport = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(report.frames_published, 1);
        assert_eq!(report.camera_name, "Mast");

        assert_eq!(
            run(&table, "help").1,
            "get-name help ping-camera set-name set-quality stats\r\n"
        );
    }
}
