use crate::config::ALLOWED_FREQUENCIES;
use crate::digitizer::Digitizer;
use crate::session::{AcqState, CommandError, Session};

/// Outcome of dispatching one command line: the text reply, the three raw
/// download blocks when the command was `download`, and whether the server
/// should shut down.
#[derive(Debug)]
pub struct Dispatch {
    pub reply: String,
    pub download: Option<[Vec<u8>; 3]>,
    pub quit: bool,
}

impl Dispatch {
    fn reply(msg: impl Into<String>) -> Self {
        Self {
            reply: msg.into(),
            download: None,
            quit: false,
        }
    }
}

/// Parse and execute one command line, producing a single reply.
///
/// Verbs are prefix-matched against the whole line with `starts_with`, in
/// this order, for compatibility with existing clients (`startle` starts the
/// acquisition too).
pub fn dispatch<D: Digitizer>(session: &mut Session<D>, line: &str) -> Dispatch {
    let line = line.trim_end_matches(['\r', '\n']);

    if line.starts_with("quit") {
        let mut out = Dispatch::reply("server is shutting down, have a good day");
        out.quit = true;
        return out;
    }

    if line.starts_with("alive") {
        return Dispatch::reply("server is alive");
    }

    if line.starts_with("model") {
        return Dispatch::reply(format!("model name: {}", session.model()));
    }

    if line.starts_with("start") {
        return match session.start() {
            Ok(()) => Dispatch::reply("acquisition started"),
            Err(e) => Dispatch::reply(e.to_string()),
        };
    }

    if line.starts_with("stop") {
        return match session.stop() {
            Ok(()) => Dispatch::reply("acquisition stopped"),
            Err(e) => Dispatch::reply(e.to_string()),
        };
    }

    if line.starts_with("swtrg") {
        return swtrg(session, line);
    }

    if line.starts_with("readout") {
        return match session.readout() {
            Ok(n) => Dispatch::reply(format!("readout completed: {n} events")),
            Err(CommandError::NotRunning) => {
                Dispatch::reply("cannot readout data, acquisition is not running")
            }
            Err(e) => Dispatch::reply(e.to_string()),
        };
    }

    if line.starts_with("download") {
        let (reply, blocks) = session.download_frame();
        return Dispatch {
            reply,
            download: Some(blocks),
            quit: false,
        };
    }

    if line.starts_with("sampling") {
        return sampling(session, line);
    }

    if line.starts_with("grmask") {
        return grmask(session, line);
    }

    if line.starts_with("chmask") {
        return chmask(session, line);
    }

    Dispatch::reply(CommandError::UnknownCommand(line.to_string()).to_string())
}

fn swtrg<D: Digitizer>(session: &mut Session<D>, line: &str) -> Dispatch {
    // gating precedes argument checks, matching the original command order
    if session.state() != AcqState::Running {
        return Dispatch::reply("cannot send soft triggers, acquisition is not running");
    }
    // the trigger command predates the quoted-argument error style of the
    // other verbs; its wording stays as clients know it
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() != 2 {
        return Dispatch::reply("[ERROR] sw_trigger command requires one argument: [ntriggers]");
    }
    let arg = words[1];
    let count = match arg.parse::<i64>() {
        Ok(count) => count,
        Err(_) => {
            return Dispatch::reply(format!(
                "[ERROR] invalid sw_trigger argument, not a valid integer: {arg}"
            ))
        }
    };
    match session.send_software_triggers(count) {
        Ok(sent) => Dispatch::reply(format!("software triggers sent: {sent}")),
        Err(e) => Dispatch::reply(e.to_string()),
    }
}

fn sampling<D: Digitizer>(session: &mut Session<D>, line: &str) -> Dispatch {
    if session.state() == AcqState::Running {
        return Dispatch::reply(CommandError::ConfigWhileRunning.to_string());
    }
    let arg = match one_arg(line, "sampling", "frequency (MHz)") {
        Ok(arg) => arg,
        Err(reply) => return Dispatch::reply(reply),
    };
    let frequency = match arg.parse::<u16>() {
        Ok(frequency) => frequency,
        Err(_) => {
            return Dispatch::reply(format!(
                "[ERROR] invalid 'sampling' argument, not a valid integer: {arg}"
            ))
        }
    };
    if !ALLOWED_FREQUENCIES.contains(&frequency) {
        return Dispatch::reply(format!(
            "[ERROR] invalid 'sampling' argument, not a valid value [5000, 2500, 1000, 750]: {arg}"
        ));
    }
    match session.set_sampling(frequency) {
        Ok(()) => Dispatch::reply(format!("sampling frequency configured: {arg}")),
        Err(e) => Dispatch::reply(e.to_string()),
    }
}

fn grmask<D: Digitizer>(session: &mut Session<D>, line: &str) -> Dispatch {
    if session.state() == AcqState::Running {
        return Dispatch::reply(CommandError::ConfigWhileRunning.to_string());
    }
    let arg = match one_arg(line, "grmask", "mask") {
        Ok(arg) => arg,
        Err(reply) => return Dispatch::reply(reply),
    };
    let mask = match parse_mask(arg) {
        Some(mask) => mask,
        None => {
            return Dispatch::reply(format!(
                "[ERROR] invalid 'grmask' argument, not a valid integer/hex: {arg}"
            ))
        }
    };
    if mask > 0x3 {
        return Dispatch::reply(format!(
            "[ERROR] invalid 'grmask' argument, not a valid value [0-3]: {arg}"
        ));
    }
    match session.set_group_mask(mask) {
        Ok(()) => Dispatch::reply(format!("group enable mask configured: {arg}")),
        Err(e) => Dispatch::reply(e.to_string()),
    }
}

fn chmask<D: Digitizer>(session: &mut Session<D>, line: &str) -> Dispatch {
    if session.state() == AcqState::Running {
        return Dispatch::reply(CommandError::ConfigWhileRunning.to_string());
    }
    let arg = match one_arg(line, "chmask", "mask") {
        Ok(arg) => arg,
        Err(reply) => return Dispatch::reply(reply),
    };
    let mask = match parse_mask(arg) {
        Some(mask) => mask,
        None => {
            return Dispatch::reply(format!(
                "[ERROR] invalid 'chmask' argument, not a valid integer/hex: {arg}"
            ))
        }
    };
    if mask > 0xFF {
        return Dispatch::reply(format!(
            "[ERROR] invalid 'chmask' argument, not a valid value [0-255]: {arg}"
        ));
    }
    match session.set_channel_mask(mask) {
        Ok(()) => Dispatch::reply(format!("channel mask configured: {arg}")),
        Err(e) => Dispatch::reply(e.to_string()),
    }
}

/// Whitespace-tokenize and require exactly one argument after the verb.
fn one_arg<'a>(line: &'a str, verb: &str, usage: &str) -> Result<&'a str, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() != 2 {
        return Err(format!(
            "[ERROR] '{verb}' command requires one argument: '{usage}'"
        ));
    }
    Ok(words[1])
}

/// Masks are accepted as decimal integers or hex, with or without a `0x`
/// prefix; the decimal reading wins for ambiguous digits.
fn parse_mask(arg: &str) -> Option<u32> {
    if let Ok(value) = arg.parse::<u32>() {
        return Some(value);
    }
    let digits = arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
        .unwrap_or(arg);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
