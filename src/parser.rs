use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{opt, value},
    sequence::{delimited, preceded},
    IResult,
};

/// Text plus the optional ids a message can carry.
#[derive(Debug, PartialEq, Clone)]
pub struct MessageArgs {
    pub text: String,
    pub id: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Check(MessageArgs),
    Admit(MessageArgs),
    Process(MessageArgs),
    Stats,
    Save,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

/// `'quoted value'` or a bare token.
fn parse_value(input: &str) -> IResult<&str, String> {
    let (input, v) = alt((
        delimited(char('\''), take_until("'"), char('\'')),
        take_while1(|c: char| !c.is_whitespace()),
    ))(input)?;
    Ok((input, v.to_string()))
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

/// `"text" [ID 'x'] [CHAT 'y']`
fn parse_message_args(input: &str) -> IResult<&str, MessageArgs> {
    let (input, _) = multispace1(input)?;
    let (input, text) = parse_quoted_string(input)?;
    let (input, id) = opt(preceded(ws(tag_ci("ID")), parse_value))(input)?;
    let (input, chat_id) = opt(preceded(ws(tag_ci("CHAT")), parse_value))(input)?;
    Ok((input, MessageArgs { text, id, chat_id }))
}

fn parse_check(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("CHECK")(input)?;
    let (input, args) = parse_message_args(input)?;
    Ok((input, Command::Check(args)))
}

fn parse_admit(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("ADMIT")(input)?;
    let (input, args) = parse_message_args(input)?;
    Ok((input, Command::Admit(args)))
}

fn parse_process(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("PROCESS")(input)?;
    let (input, args) = parse_message_args(input)?;
    Ok((input, Command::Process(args)))
}

fn parse_keyword(input: &str) -> IResult<&str, Command> {
    alt((
        value(Command::Stats, tag_ci("STATS")),
        value(Command::Save, tag_ci("SAVE")),
        value(Command::Help, tag_ci("HELP")),
        value(Command::Exit, alt((tag_ci("EXIT"), tag_ci("QUIT")))),
    ))(input)
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((parse_check, parse_admit, parse_process, parse_keyword))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            if context.len() < e.input.len() {
                Err(format!("Invalid syntax near: '{}...'", context))
            } else {
                Err(format!("Invalid syntax near: '{}'", context))
            }
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_with_text_only() {
        let cmd = parse_command(r#"CHECK "Binance lists DOGE/USDT""#).unwrap();
        assert_eq!(
            cmd,
            Command::Check(MessageArgs { text: "Binance lists DOGE/USDT".into(), id: None, chat_id: None })
        );
    }

    #[test]
    fn ids_quoted_or_bare_and_case_insensitive() {
        let cmd = parse_command(r#"process "some news text" id '1001' chat -100123"#).unwrap();
        assert_eq!(
            cmd,
            Command::Process(MessageArgs {
                text: "some news text".into(),
                id: Some("1001".into()),
                chat_id: Some("-100123".into()),
            })
        );

        let cmd = parse_command(r#"Admit "x y z" CHAT 'news feed'"#).unwrap();
        assert_eq!(
            cmd,
            Command::Admit(MessageArgs { text: "x y z".into(), id: None, chat_id: Some("news feed".into()) })
        );
    }

    #[test]
    fn keywords() {
        assert_eq!(parse_command("stats").unwrap(), Command::Stats);
        assert_eq!(parse_command("  SAVE ").unwrap(), Command::Save);
        assert_eq!(parse_command("help").unwrap(), Command::Help);
        assert_eq!(parse_command("QUIT").unwrap(), Command::Exit);
        assert_eq!(parse_command("exit").unwrap(), Command::Exit);
    }

    #[test]
    fn errors_are_reported() {
        assert!(parse_command("CHECK unquoted text").unwrap_err().starts_with("Invalid syntax"));
        assert!(parse_command(r#"CHECK "unterminated"#).is_err());
        assert!(parse_command("STATS now").unwrap_err().starts_with("Unexpected tokens"));
        assert!(parse_command("DROP TABLE").is_err());
    }

    #[test]
    fn non_ascii_text_survives() {
        let cmd = parse_command("CHECK \"币安将上线 DOGE/USDT 交易对\"").unwrap();
        match cmd {
            Command::Check(args) => assert_eq!(args.text, "币安将上线 DOGE/USDT 交易对"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
