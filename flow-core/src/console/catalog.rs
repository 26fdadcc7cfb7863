//! Ordered command table for the flow board console.
//!
//! Write forms come first, then queries. The grammar walks the table in
//! order and takes the first entry whose keyword and form both match, so a
//! keyword such as `mode` resolves to the write form only when `=` follows.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandTag {
    SetMode,
    OpenSideA,
    OpenSideB,
    SetPulse,
    SetCurrent,
    Panic,
    Mode,
    Current,
    Pulse,
    Version,
    Serial,
    Count,
    Help,
}

/// Value expected after `=`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSpec {
    /// A state token or `PUMP_TOGGLE`, matched exactly.
    StateToken,
    Integer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandForm {
    /// `keyword=value`
    Assign(ValueSpec),
    /// Bare keyword.
    Query,
    /// Keyword with an optional identifier topic.
    QueryWithTopic,
}

impl CommandForm {
    #[must_use]
    pub const fn is_assignment(self) -> bool {
        matches!(self, CommandForm::Assign(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandTableEntry {
    pub keyword: &'static str,
    pub form: CommandForm,
    pub tag: CommandTag,
    pub help: &'static str,
}

const COMMANDS: [CommandTableEntry; 13] = [
    CommandTableEntry {
        keyword: "mode",
        form: CommandForm::Assign(ValueSpec::StateToken),
        tag: CommandTag::SetMode,
        help: "mode=<TOKEN> apply a sampling state",
    },
    CommandTableEntry {
        keyword: "vac",
        form: CommandForm::Assign(ValueSpec::Integer),
        tag: CommandTag::OpenSideA,
        help: "vac=<0-5> drive valve to side A",
    },
    CommandTableEntry {
        keyword: "vbc",
        form: CommandForm::Assign(ValueSpec::Integer),
        tag: CommandTag::OpenSideB,
        help: "vbc=<0-5> drive valve to side B",
    },
    CommandTableEntry {
        keyword: "pulse",
        form: CommandForm::Assign(ValueSpec::Integer),
        tag: CommandTag::SetPulse,
        help: "pulse=<5-1000> valve pulse ms",
    },
    CommandTableEntry {
        keyword: "current",
        form: CommandForm::Assign(ValueSpec::Integer),
        tag: CommandTag::SetCurrent,
        help: "current=<0-7> valve drive level",
    },
    CommandTableEntry {
        keyword: "panic",
        form: CommandForm::Query,
        tag: CommandTag::Panic,
        help: "panic sweep all valves",
    },
    CommandTableEntry {
        keyword: "mode",
        form: CommandForm::Query,
        tag: CommandTag::Mode,
        help: "mode report sampling state",
    },
    CommandTableEntry {
        keyword: "current",
        form: CommandForm::Query,
        tag: CommandTag::Current,
        help: "current report drive level",
    },
    CommandTableEntry {
        keyword: "pulse",
        form: CommandForm::Query,
        tag: CommandTag::Pulse,
        help: "pulse report pulse width",
    },
    CommandTableEntry {
        keyword: "ver",
        form: CommandForm::Query,
        tag: CommandTag::Version,
        help: "ver firmware version",
    },
    CommandTableEntry {
        keyword: "ser",
        form: CommandForm::Query,
        tag: CommandTag::Serial,
        help: "ser serial number",
    },
    CommandTableEntry {
        keyword: "count",
        form: CommandForm::Query,
        tag: CommandTag::Count,
        help: "count startup counter",
    },
    CommandTableEntry {
        keyword: "help",
        form: CommandForm::QueryWithTopic,
        tag: CommandTag::Help,
        help: "help [command] list commands",
    },
];

/// Returns the full command table in match order.
#[must_use]
pub const fn commands() -> &'static [CommandTableEntry] {
    &COMMANDS
}

/// Finds the first entry whose keyword matches (case-insensitive) and whose
/// form agrees with `assignment`.
#[must_use]
pub fn find(keyword: &str, assignment: bool) -> Option<&'static CommandTableEntry> {
    COMMANDS.iter().find(|entry| {
        entry.form.is_assignment() == assignment && entry.keyword.eq_ignore_ascii_case(keyword)
    })
}

/// Finds every entry documented under `topic`, write form first.
pub fn topic(topic: &str) -> impl Iterator<Item = &'static CommandTableEntry> + '_ {
    COMMANDS
        .iter()
        .filter(move |entry| entry.keyword.eq_ignore_ascii_case(topic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_forms_precede_queries() {
        let first_query = commands()
            .iter()
            .position(|entry| !entry.form.is_assignment())
            .expect("queries exist");
        assert!(
            commands()
                .iter()
                .skip(first_query)
                .all(|entry| !entry.form.is_assignment())
        );
    }

    #[test]
    fn keyword_resolves_by_form() {
        assert_eq!(find("mode", true).map(|e| e.tag), Some(CommandTag::SetMode));
        assert_eq!(find("MODE", false).map(|e| e.tag), Some(CommandTag::Mode));
        assert_eq!(find("panic", true), None);
        assert_eq!(find("modex", false), None);
    }

    #[test]
    fn topic_lists_both_forms() {
        let tags: heapless::Vec<CommandTag, 4> = topic("pulse").map(|e| e.tag).collect();
        assert_eq!(tags.as_slice(), &[CommandTag::SetPulse, CommandTag::Pulse]);
    }
}
