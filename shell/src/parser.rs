use crate::error::ParseError;
use crate::types::*;

type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, PartialEq, Eq)]
enum Token {
	Word(String),
	Input,
}

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Parser<'a> {
	fn new(line: &'a [u8]) -> Parser<'a> {
		Parser { line, i: 0 }
	}

	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(&c) = self.line.get(self.i) {
			if !f(c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t' | b'\n' | b'\r')
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	// Quotes toggle in place and are dropped; an unmatched quote runs to the end.
	fn read_word(&mut self) -> String {
		let mut word: Vec<u8> = vec![];
		let mut quoted = false;
		while let Some(&c) = self.line.get(self.i) {
			if c == b'"' {
				quoted = !quoted;
				self.i += 1;
				continue;
			}
			if !quoted && (Parser::is_whitespace(c) || c == b'<') {
				break;
			}
			word.push(c);
			self.i += 1;
		}
		String::from_utf8_lossy(&word).into_owned()
	}

	fn tokenize(&mut self) -> Vec<Token> {
		let mut tokens = vec![];
		loop {
			self.skip_whitespaces();
			match self.line.get(self.i) {
				None => break,
				Some(&b'<') => {
					self.i += 1;
					tokens.push(Token::Input);
				},
				Some(_) => tokens.push(Token::Word(self.read_word())),
			}
		}
		tokens
	}

	fn parse_command(&mut self, is_first: bool) -> ParseResult<Command> {
		let mut name: Option<String> = None;
		let mut arguments: Vec<String> = vec![];
		let mut input: Option<String> = None;

		let mut tokens = self.tokenize().into_iter();
		while let Some(token) = tokens.next() {
			match token {
				Token::Input => match tokens.next() {
					Some(Token::Word(target)) if is_first && input.is_none() && !target.is_empty() => {
						input = Some(target);
					},
					_ => return Err(ParseError::BadRedirect),
				},
				Token::Word(word) => if name.is_none() {
					name = Some(word);
				} else {
					arguments.push(word);
				},
			}
		}

		let name = match name {
			Some(name) if !name.is_empty() => name,
			_ => return Err(ParseError::EmptyCommand),
		};
		if name.len() >= EXE_MAX || arguments.len() > ARGV_MAX {
			return Err(ParseError::CmdOrArgsTooBig);
		}
		let command = Command { name, arguments, input };
		if command.args_text().len() >= ARG_MAX {
			return Err(ParseError::CmdOrArgsTooBig);
		}
		Ok(command)
	}
}

fn split_stages(line: &[u8]) -> Vec<&[u8]> {
	let mut stages = vec![];
	let mut quoted = false;
	let mut start = 0;
	for (i, &c) in line.iter().enumerate() {
		match c {
			b'"' => quoted = !quoted,
			b'|' if !quoted => {
				stages.push(&line[start .. i]);
				start = i + 1;
			},
			_ => {},
		}
	}
	stages.push(&line[start ..]);
	stages
}

fn trim(stage: &[u8]) -> &[u8] {
	let begin = stage.iter().position(|&c| !Parser::is_whitespace(c)).unwrap_or(stage.len());
	let end = stage.iter().rposition(|&c| !Parser::is_whitespace(c)).map_or(begin, |i| i + 1);
	&stage[begin .. end]
}

/// Parses one command line into its pipeline stages.
///
/// Returns `Ok(None)` when the line holds no command at all.
pub fn parse(line: &str) -> ParseResult<Option<CommandList>> {
	let stages: Vec<&[u8]> = split_stages(line.as_bytes())
		.into_iter()
		.map(trim)
		.filter(|stage| !stage.is_empty())
		.collect();
	if stages.is_empty() {
		return Ok(None);
	}
	if stages.len() > CMD_MAX {
		return Err(ParseError::TooManyCommands);
	}

	let mut commands = Vec::with_capacity(stages.len());
	for (i, stage) in stages.into_iter().enumerate() {
		commands.push(Parser::new(stage).parse_command(i == 0)?);
	}
	Ok(Some(CommandList { commands }))
}
