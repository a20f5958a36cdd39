//! Model expressions such as `background + 1e-10 * exposure * psf(normgauss2d.g0)`.
//!
//! Grammar (whitespace-insensitive):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor ('*' factor)*
//! factor := number | '-' factor | '(' expr ')' | ident ['(' expr ')']
//! ```
//!
//! Identifiers resolve against the components registered in the session at
//! parse time. An identifier followed by `(` must be a PSF and convolves its
//! argument.

use std::collections::BTreeSet;

use crate::error::AppError;
use crate::math::convolve2d;
use crate::models::component::{Component, ComponentKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ModelExpr {
    Const(f64),
    /// Index into the session's component list.
    Component(usize),
    Convolve { psf: usize, inner: Box<ModelExpr> },
    Neg(Box<ModelExpr>),
    Add(Box<ModelExpr>, Box<ModelExpr>),
    Sub(Box<ModelExpr>, Box<ModelExpr>),
    Mul(Box<ModelExpr>, Box<ModelExpr>),
}

/// Pixel-centre coordinates plus the image shape (needed for convolution).
pub struct EvalGrid<'a> {
    pub coords: &'a [(f64, f64)],
    pub nx: usize,
    pub ny: usize,
}

impl ModelExpr {
    pub fn parse(text: &str, components: &[Component]) -> Result<Self, AppError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            text,
            tokens,
            pos: 0,
            components,
        };
        let expr = parser.expr()?;
        if let Some((tok, at)) = parser.tokens.get(parser.pos) {
            return Err(parser.error(*at, &format!("unexpected {tok:?}")));
        }
        Ok(expr)
    }

    /// Indices of every component the expression references (PSFs included).
    pub fn component_indices(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_indices(&mut out);
        out
    }

    fn collect_indices(&self, out: &mut BTreeSet<usize>) {
        match self {
            ModelExpr::Const(_) => {}
            ModelExpr::Component(idx) => {
                out.insert(*idx);
            }
            ModelExpr::Convolve { psf, inner } => {
                out.insert(*psf);
                inner.collect_indices(out);
            }
            ModelExpr::Neg(inner) => inner.collect_indices(out),
            ModelExpr::Add(a, b) | ModelExpr::Sub(a, b) | ModelExpr::Mul(a, b) => {
                a.collect_indices(out);
                b.collect_indices(out);
            }
        }
    }

    /// Evaluate the expression on every pixel of the grid.
    pub fn eval(&self, components: &[Component], grid: &EvalGrid<'_>) -> Result<Vec<f64>, AppError> {
        let n = grid.coords.len();
        match self {
            ModelExpr::Const(v) => Ok(vec![*v; n]),
            ModelExpr::Component(idx) => components[*idx].eval(grid.coords),
            ModelExpr::Convolve { psf, inner } => {
                let ComponentKind::Psf(kernel) = &components[*psf].kind else {
                    return Err(AppError::input(format!(
                        "'{}' is not a PSF model.",
                        components[*psf].full_name()
                    )));
                };
                let values = inner.eval(components, grid)?;
                Ok(convolve2d(&values, grid.nx, grid.ny, kernel))
            }
            ModelExpr::Neg(inner) => Ok(inner.eval(components, grid)?.into_iter().map(|v| -v).collect()),
            ModelExpr::Add(a, b) => combine(a, b, components, grid, |x, y| x + y),
            ModelExpr::Sub(a, b) => combine(a, b, components, grid, |x, y| x - y),
            ModelExpr::Mul(a, b) => combine(a, b, components, grid, |x, y| x * y),
        }
    }
}

fn combine(
    a: &ModelExpr,
    b: &ModelExpr,
    components: &[Component],
    grid: &EvalGrid<'_>,
    op: impl Fn(f64, f64) -> f64,
) -> Result<Vec<f64>, AppError> {
    // Constants are folded into the other operand instead of materialising a grid.
    match (a, b) {
        (ModelExpr::Const(x), other) => Ok(other.eval(components, grid)?.into_iter().map(|y| op(*x, y)).collect()),
        (other, ModelExpr::Const(y)) => Ok(other.eval(components, grid)?.into_iter().map(|x| op(x, *y)).collect()),
        _ => {
            let mut lhs = a.eval(components, grid)?;
            let rhs = b.eval(components, grid)?;
            lhs.iter_mut().zip(rhs).for_each(|(x, y)| *x = op(*x, y));
            Ok(lhs)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, AppError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => out.push((Token::Plus, start)),
            '-' => out.push((Token::Minus, start)),
            '*' => out.push((Token::Star, start)),
            '(' => out.push((Token::LParen, start)),
            ')' => out.push((Token::RParen, start)),
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent: e, E, optionally signed.
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    AppError::input(format!("Invalid number '{literal}' in model expression '{text}'."))
                })?;
                out.push((Token::Num(value), start));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                out.push((Token::Ident(chars[start..i].iter().collect()), start));
                continue;
            }
            other => {
                return Err(AppError::input(format!(
                    "Unexpected character '{other}' at position {start} in model expression '{text}'."
                )));
            }
        }
        i += 1;
    }

    Ok(out)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
    components: &'a [Component],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn at(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, at)| *at).unwrap_or(self.text.len())
    }

    fn error(&self, at: usize, what: &str) -> AppError {
        AppError::input(format!(
            "Invalid model expression '{}': {what} at position {at}.",
            self.text
        ))
    }

    fn expect(&mut self, tok: Token) -> Result<(), AppError> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(self.at(), &format!("expected {tok:?}")))
        }
    }

    fn expr(&mut self) -> Result<ModelExpr, AppError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    lhs = ModelExpr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    lhs = ModelExpr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<ModelExpr, AppError> {
        let mut lhs = self.factor()?;
        while self.peek() == Some(&Token::Star) {
            self.pos += 1;
            lhs = ModelExpr::Mul(Box::new(lhs), Box::new(self.factor()?));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<ModelExpr, AppError> {
        let at = self.at();
        let Some((tok, _)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error(at, "unexpected end of input"));
        };
        self.pos += 1;

        match tok {
            Token::Num(v) => Ok(ModelExpr::Const(v)),
            Token::Minus => Ok(ModelExpr::Neg(Box::new(self.factor()?))),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                let idx = self
                    .components
                    .iter()
                    .position(|c| c.matches(&name))
                    .ok_or_else(|| self.error(at, &format!("unknown model component '{name}'")))?;
                let is_psf = matches!(self.components[idx].kind, ComponentKind::Psf(_));

                if self.peek() == Some(&Token::LParen) {
                    if !is_psf {
                        return Err(self.error(at, &format!("'{name}' is not a PSF model and cannot be applied")));
                    }
                    self.pos += 1;
                    let inner = self.expr()?;
                    self.expect(Token::RParen)?;
                    return Ok(ModelExpr::Convolve {
                        psf: idx,
                        inner: Box::new(inner),
                    });
                }
                if is_psf {
                    return Err(self.error(at, &format!("PSF model '{name}' must be applied to a model")));
                }
                Ok(ModelExpr::Component(idx))
            }
            other => Err(self.error(at, &format!("unexpected {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Image;
    use crate::math::PsfKernel;
    use crate::models::gauss::GaussKind;

    fn registry() -> Vec<Component> {
        let (nx, ny) = (3, 3);
        vec![
            Component::table("background", Image::new(nx, ny, vec![1.0; 9])),
            Component::table("exposure", Image::new(nx, ny, vec![2e10; 9])),
            Component::psf("psf", PsfKernel::delta()),
            Component::gauss(GaussKind::Gauss2D, "g0"),
            Component::gauss(GaussKind::Gauss2D, "g1"),
        ]
    }

    #[test]
    fn parses_full_model_with_compound_source() {
        let comps = registry();
        let expr = ModelExpr::parse(
            "background + 1e-10 * exposure * psf((gauss2d.g0 + gauss2d.g1))",
            &comps,
        )
        .unwrap();
        let used: Vec<usize> = expr.component_indices().into_iter().collect();
        assert_eq!(used, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn number_with_negative_exponent_is_one_token() {
        let toks = tokenize("1e-10*x").unwrap();
        assert_eq!(toks[0].0, Token::Num(1e-10));
        assert_eq!(toks[1].0, Token::Star);
        assert_eq!(toks[2].0, Token::Ident("x".to_string()));
    }

    #[test]
    fn evaluates_scaled_exposure_times_source() {
        let mut comps = registry();
        {
            let g = &mut comps[3];
            g.param_mut("xpos").unwrap().set(2.0);
            g.param_mut("ypos").unwrap().set(2.0);
            g.param_mut("ampl").unwrap().set(3.0);
        }
        let expr = ModelExpr::parse("background + 1e-10 * exposure * psf(g0)", &comps).unwrap();
        let coords: Vec<(f64, f64)> = (0..9).map(|i| ((i % 3 + 1) as f64, (i / 3 + 1) as f64)).collect();
        let grid = EvalGrid {
            coords: &coords,
            nx: 3,
            ny: 3,
        };
        let values = expr.eval(&comps, &grid).unwrap();
        // Centre pixel: 1 + 1e-10 * 2e10 * 3 = 7.
        assert!((values[4] - 7.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_unknown_names_and_misused_psf() {
        let comps = registry();
        assert!(ModelExpr::parse("background + nope", &comps).is_err());
        assert!(ModelExpr::parse("background * psf", &comps).is_err());
        assert!(ModelExpr::parse("exposure(g0)", &comps).is_err());
        assert!(ModelExpr::parse("background + (g0", &comps).is_err());
        assert!(ModelExpr::parse("background g0", &comps).is_err());
        assert!(ModelExpr::parse("background $ g0", &comps).is_err());
    }

    #[test]
    fn tolerates_space_before_psf_argument() {
        let comps = registry();
        assert!(ModelExpr::parse("background + 1e-10 * exposure * psf (gauss2d.g0)", &comps).is_ok());
    }
}
