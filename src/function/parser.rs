// Copyright 2025 Lodestone Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Expression text parser
//!
//! Recursive-descent parser for the textual function syntax used in stat
//! expressions and facet requests:
//!
//! ```text
//! price                     numeric field leaf
//! str(cat)                  string field leaf
//! 3.5                       constant
//! 'west'                    constant string
//! pow(price,2)              wrappers, arbitrarily nested
//! if(str(cat),neg(qty),0)
//! idf(body,rust)            index-wide statistics
//! ```
//!
//! An unknown function name is a configuration error, reported before any
//! evaluation starts.

use std::sync::Arc;

use super::{BoolOp, FuncSource, NumericOp};
use crate::core::{Error, Result};

/// Parse one expression, consuming the entire input
pub fn parse_func(input: &str) -> Result<FuncSource> {
    let mut p = Parser::new(input);
    let node = p.parse_expr()?;
    p.skip_ws();
    if p.pos < p.chars.len() {
        return Err(Error::parse(format!(
            "unexpected trailing input at offset {} in '{input}'",
            p.pos
        )));
    }
    Ok(node)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Parser {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::parse(format!(
                "expected '{c}' at offset {}",
                self.pos
            )))
        }
    }

    fn parse_expr(&mut self) -> Result<FuncSource> {
        self.skip_ws();
        match self.peek() {
            Some('\'') => self.parse_quoted(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '.' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_call_or_field(),
            Some(c) => Err(Error::parse(format!(
                "unexpected character '{c}' at offset {}",
                self.pos
            ))),
            None => Err(Error::parse("unexpected end of expression".to_string())),
        }
    }

    fn parse_quoted(&mut self) -> Result<FuncSource> {
        self.pos += 1; // opening quote
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '\'' {
                let text: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return Ok(FuncSource::ConstStr(Arc::from(text.as_str())));
            }
            self.pos += 1;
        }
        Err(Error::parse("unterminated string literal".to_string()))
    }

    fn parse_number(&mut self) -> Result<FuncSource> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let v = text
            .parse::<f64>()
            .map_err(|_| Error::parse(format!("bad number literal '{text}'")))?;
        Ok(FuncSource::Const(v))
    }

    fn parse_ident(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(Error::parse(format!(
                "expected identifier at offset {start}"
            )));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// A term argument: bare identifier, quoted literal or number text
    fn parse_term_arg(&mut self) -> Result<String> {
        self.skip_ws();
        match self.peek() {
            Some('\'') => match self.parse_quoted()? {
                FuncSource::ConstStr(s) => Ok(s.to_string()),
                _ => unreachable!(),
            },
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let start = self.pos;
                if c == '-' {
                    self.pos += 1;
                }
                while self
                    .peek()
                    .is_some_and(|ch| ch.is_ascii_digit() || ch == '.')
                {
                    self.pos += 1;
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
            _ => self.parse_ident(),
        }
    }

    fn parse_call_or_field(&mut self) -> Result<FuncSource> {
        let name = self.parse_ident()?;
        self.skip_ws();
        if self.peek() != Some('(') {
            // A bare identifier reads the field as a double.
            return Ok(FuncSource::DoubleField(name));
        }
        self.pos += 1; // opening paren
        let node = self.parse_call(&name)?;
        self.expect(')')?;
        Ok(node)
    }

    fn parse_args(&mut self) -> Result<Vec<Arc<FuncSource>>> {
        let mut args = vec![Arc::new(self.parse_expr()?)];
        loop {
            self.skip_ws();
            if self.peek() == Some(',') {
                self.pos += 1;
                args.push(Arc::new(self.parse_expr()?));
            } else {
                return Ok(args);
            }
        }
    }

    fn parse_field_term(&mut self) -> Result<(String, String)> {
        let field = self.parse_ident()?;
        self.expect(',')?;
        let term = self.parse_term_arg()?;
        Ok((field, term))
    }

    fn parse_call(&mut self, name: &str) -> Result<FuncSource> {
        let arity = |args: Vec<Arc<FuncSource>>, n: usize| -> Result<Vec<Arc<FuncSource>>> {
            if args.len() == n {
                Ok(args)
            } else {
                Err(Error::parse(format!(
                    "{name}() takes {n} argument(s), got {}",
                    args.len()
                )))
            }
        };
        match name {
            "const" => {
                let mut args = arity(self.parse_args()?, 1)?;
                match Arc::try_unwrap(args.remove(0)) {
                    Ok(FuncSource::Const(v)) => Ok(FuncSource::Const(v)),
                    _ => Err(Error::parse("const() takes a number literal".to_string())),
                }
            }
            "str" => Ok(FuncSource::StrField(self.parse_ident()?)),
            "ord" => Ok(FuncSource::Ord(self.parse_ident()?)),
            "norm" => Ok(FuncSource::Norm(self.parse_ident()?)),
            "docfreq" => {
                let (field, term) = self.parse_field_term()?;
                Ok(FuncSource::DocFreq { field, term })
            }
            "idf" => {
                let (field, term) = self.parse_field_term()?;
                Ok(FuncSource::Idf { field, term })
            }
            "ttf" | "totaltermfreq" => {
                let (field, term) = self.parse_field_term()?;
                Ok(FuncSource::TotalTermFreq { field, term })
            }
            "neg" => {
                let mut args = arity(self.parse_args()?, 1)?;
                Ok(FuncSource::Neg(args.remove(0)))
            }
            "pow" => {
                let mut args = arity(self.parse_args()?, 2)?;
                let base = args.remove(0);
                let exponent = args.remove(0);
                Ok(FuncSource::Pow(base, exponent))
            }
            "add" | "sum" => Ok(FuncSource::MultiNumeric {
                op: NumericOp::Add,
                sources: self.parse_args()?,
            }),
            "mul" | "product" => Ok(FuncSource::MultiNumeric {
                op: NumericOp::Mul,
                sources: self.parse_args()?,
            }),
            "min" => Ok(FuncSource::MultiNumeric {
                op: NumericOp::Min,
                sources: self.parse_args()?,
            }),
            "max" => Ok(FuncSource::MultiNumeric {
                op: NumericOp::Max,
                sources: self.parse_args()?,
            }),
            "concat" => Ok(FuncSource::Concat(self.parse_args()?)),
            "not" => {
                let mut args = arity(self.parse_args()?, 1)?;
                Ok(FuncSource::Not(args.remove(0)))
            }
            "and" => Ok(FuncSource::MultiBool {
                op: BoolOp::And,
                sources: self.parse_args()?,
            }),
            "or" => Ok(FuncSource::MultiBool {
                op: BoolOp::Or,
                sources: self.parse_args()?,
            }),
            "if" => {
                let mut args = arity(self.parse_args()?, 3)?;
                let guard = args.remove(0);
                let then = args.remove(0);
                let orelse = args.remove(0);
                Ok(FuncSource::If {
                    guard,
                    then,
                    orelse,
                })
            }
            other => Err(Error::UnknownFunction(other.to_string())),
        }
    }
}
