use synthesis_core::Label;

/// A chat command understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    List(Label),
    Unknown(String),
}

impl BotCommand {
    /// Parse the first word of a message. Returns `None` for plain text.
    /// A `@botname` suffix is ignored, as are trailing arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name).to_lowercase();

        let command = match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "what_to_buy" => Self::List(Label::Buy),
            "what_to_sell" => Self::List(Label::Sell),
            "what_to_keep" => Self::List(Label::Keep),
            "what_to_take_profit" => Self::List(Label::TakeProfit),
            _ => Self::Unknown(name),
        };
        Some(command)
    }
}
