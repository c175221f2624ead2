use std::fmt;
use std::ops::Range;

use chumsky::Stream;
use chumsky::error::SimpleReason;
use chumsky::prelude::*;
use weave_utils::{Diagnostic, DiagnosticSeverity};

use super::syntax::{
    BodyLine, FieldSyntax, Item, Local, Member, MethodSyntax, Operand, Param, PropertySyntax,
    TypeExpr, TypeSyntax, Word,
};
use crate::lexer::token::{Span, Token, TokenKind};
use crate::module::{Annotation, AnnotationArg, Literal};

#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl ParserError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn to_diagnostic(&self, source_id: &str) -> Diagnostic {
        let diagnostic = Diagnostic::new(
            DiagnosticSeverity::Error,
            source_id,
            Some(self.span),
            self.message.clone(),
        );
        match &self.help {
            Some(help) => diagnostic.with_help(help.clone()),
            None => diagnostic,
        }
    }
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {:?}", self.message, self.span)
    }
}

impl std::error::Error for ParserError {}

impl From<Simple<TokenKind>> for ParserError {
    fn from(value: Simple<TokenKind>) -> Self {
        let span = Span::from(value.span());
        if let SimpleReason::Custom(message) = value.reason() {
            return Self::new(message.clone(), span);
        }

        let found = value
            .found()
            .map_or_else(|| "end of input".to_string(), ToString::to_string);
        let mut expected: Vec<String> = value
            .expected()
            .filter_map(|kind| kind.as_ref().map(ToString::to_string))
            .collect();
        expected.sort();
        expected.dedup();

        let error = Self::new(format!("unexpected {found}"), span);
        if expected.is_empty() {
            error
        } else {
            error.with_help(format!("expected {}", expected.join(", ")))
        }
    }
}

pub fn parse(tokens: &[Token]) -> Result<Vec<Item>, Vec<ParserError>> {
    let end = tokens.last().map_or(0, |token| token.span.end());
    let stream = Stream::from_iter(
        end..end + 1,
        tokens
            .iter()
            .cloned()
            .map(|token| (token.kind, token.span.into())),
    );

    file_parser()
        .parse(stream)
        .map_err(|errors| errors.into_iter().map(ParserError::from).collect())
}

enum Numeric {
    Int(i64),
    Float(f64),
}

fn parse_numeric(
    negative: bool,
    text: &str,
    span: Range<usize>,
) -> Result<Numeric, Simple<TokenKind>> {
    let signed = if negative {
        format!("-{text}")
    } else {
        text.to_string()
    };
    let parsed = if text.contains(['.', 'e', 'E']) {
        signed.parse::<f64>().ok().map(Numeric::Float)
    } else {
        signed.parse::<i64>().ok().map(Numeric::Int)
    };
    parsed.ok_or_else(|| Simple::custom(span, format!("invalid number `{signed}`")))
}

fn identifier_parser() -> impl Parser<TokenKind, String, Error = Simple<TokenKind>> + Clone {
    select! { TokenKind::Identifier(name) => name }
}

fn word_parser() -> impl Parser<TokenKind, Word, Error = Simple<TokenKind>> + Clone {
    identifier_parser().map_with_span(|text, span: Range<usize>| Word {
        text,
        span: span.into(),
    })
}

fn newline_parser() -> impl Parser<TokenKind, (), Error = Simple<TokenKind>> + Clone {
    just(TokenKind::Newline).ignored()
}

fn number_parser() -> impl Parser<TokenKind, Numeric, Error = Simple<TokenKind>> + Clone {
    just(TokenKind::Minus)
        .or_not()
        .then(select! { TokenKind::Number(text) => text })
        .try_map(|(minus, text), span| parse_numeric(minus.is_some(), &text, span))
}

fn type_parser() -> impl Parser<TokenKind, TypeExpr, Error = Simple<TokenKind>> + Clone {
    identifier_parser()
        .then(
            just(TokenKind::LBracket)
                .then(just(TokenKind::RBracket))
                .repeated(),
        )
        .map_with_span(|(name, dims), span: Range<usize>| TypeExpr {
            name,
            array_depth: dims.len(),
            span: span.into(),
        })
}

fn literal_parser() -> impl Parser<TokenKind, Literal, Error = Simple<TokenKind>> + Clone {
    let numeric = number_parser().map(|number| match number {
        Numeric::Int(value) => Literal::Int(value),
        Numeric::Float(value) => Literal::Float(value),
    });
    let string = select! { TokenKind::StringLiteral(value) => Literal::Str(value) };
    let word = identifier_parser().map(|word| match word.as_str() {
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        _ => Literal::Ident(word),
    });
    choice((numeric, string, word))
}

fn annotation_parser() -> impl Parser<TokenKind, Annotation, Error = Simple<TokenKind>> + Clone {
    let arg = identifier_parser()
        .then_ignore(just(TokenKind::Colon))
        .then(literal_parser())
        .map(|(name, value)| AnnotationArg { name, value });

    just(TokenKind::At)
        .ignore_then(identifier_parser())
        .then(
            arg.separated_by(just(TokenKind::Comma))
                .allow_trailing()
                .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen))
                .or_not(),
        )
        .map_with_span(|(name, args), span: Range<usize>| Annotation {
            name,
            args: args.unwrap_or_default(),
            span: Some(span.into()),
        })
}

fn operand_parser() -> impl Parser<TokenKind, (Operand, Span), Error = Simple<TokenKind>> + Clone {
    let generic_args = type_parser()
        .separated_by(just(TokenKind::Comma))
        .at_least(1)
        .delimited_by(just(TokenKind::Lt), just(TokenKind::Gt));

    let arity = just(TokenKind::Slash)
        .ignore_then(select! { TokenKind::Number(text) => text })
        .try_map(|text, span| {
            text.parse::<u16>()
                .map_err(|_| Simple::custom(span, format!("invalid arity `{text}`")))
        });

    let member = identifier_parser()
        .then_ignore(just(TokenKind::DoubleColon))
        .then(identifier_parser())
        .then(arity.or_not())
        .then(generic_args.or_not())
        .map(|(((owner, name), arity), generic_args)| Operand::Member {
            owner,
            name,
            arity,
            generic_args: generic_args.unwrap_or_default(),
        });

    let numeric = number_parser().map(|number| match number {
        Numeric::Int(value) => Operand::Int(value),
        Numeric::Float(value) => Operand::Float(value),
    });
    let string = select! { TokenKind::StringLiteral(value) => Operand::Str(value) };

    choice((member, numeric, string, type_parser().map(Operand::Type)))
        .map_with_span(|operand, span: Range<usize>| (operand, span.into()))
}

fn body_line_parser() -> impl Parser<TokenKind, BodyLine, Error = Simple<TokenKind>> + Clone {
    let local = identifier_parser()
        .then_ignore(just(TokenKind::Colon))
        .then(type_parser())
        .map_with_span(|(name, ty), span: Range<usize>| Local {
            name,
            ty,
            span: span.into(),
        });

    let locals = just(TokenKind::Locals)
        .ignore_then(local.separated_by(just(TokenKind::Comma)).at_least(1))
        .then_ignore(newline_parser())
        .map(BodyLine::Locals);

    let label = word_parser()
        .then_ignore(just(TokenKind::Colon))
        .then_ignore(newline_parser())
        .map(BodyLine::Label);

    let instruction = word_parser()
        .then(operand_parser().repeated())
        .map_with_span(|(opcode, operands), span: Range<usize>| BodyLine::Instruction {
            opcode,
            operands,
            span: span.into(),
        })
        .then_ignore(newline_parser());

    choice((locals, label, instruction))
}

/// `:` newline, then one or more indented `item`s.
fn indented<T>(
    item: impl Parser<TokenKind, T, Error = Simple<TokenKind>> + Clone,
) -> impl Parser<TokenKind, Vec<T>, Error = Simple<TokenKind>> + Clone {
    just(TokenKind::Colon)
        .ignore_then(newline_parser())
        .ignore_then(
            item.repeated()
                .at_least(1)
                .delimited_by(just(TokenKind::Indent), just(TokenKind::Dedent)),
        )
}

fn member_parser() -> impl Parser<TokenKind, Member, Error = Simple<TokenKind>> + Clone {
    let annotations = annotation_parser().repeated();

    let field = just(TokenKind::Field)
        .ignore_then(identifier_parser())
        .then_ignore(just(TokenKind::Colon))
        .then(type_parser())
        .then(word_parser().repeated())
        .then(annotations.clone())
        .map_with_span(
            |(((name, ty), words), annotations), span: Range<usize>| FieldSyntax {
                name,
                ty,
                words,
                annotations,
                span: span.into(),
            },
        )
        .then_ignore(newline_parser())
        .map(Member::Field)
        .boxed();

    let property = just(TokenKind::Property)
        .ignore_then(identifier_parser())
        .then_ignore(just(TokenKind::Colon))
        .then(type_parser())
        .then(word_parser().repeated())
        .then(annotations.clone())
        .map_with_span(
            |(((name, ty), words), annotations), span: Range<usize>| PropertySyntax {
                name,
                ty,
                words,
                annotations,
                span: span.into(),
            },
        )
        .then_ignore(newline_parser())
        .map(Member::Property)
        .boxed();

    let generics = identifier_parser()
        .separated_by(just(TokenKind::Comma))
        .at_least(1)
        .delimited_by(just(TokenKind::Lt), just(TokenKind::Gt));

    let param = identifier_parser()
        .then_ignore(just(TokenKind::Colon))
        .then(type_parser())
        .map(|(name, ty)| Param { name, ty });

    let params = param
        .separated_by(just(TokenKind::Comma))
        .allow_trailing()
        .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen));

    let body = indented(body_line_parser())
        .map(Some)
        .or(newline_parser().to(None));

    let method = just(TokenKind::Method)
        .ignore_then(identifier_parser())
        .then(generics.or_not())
        .then(params)
        .then_ignore(just(TokenKind::Arrow))
        .then(type_parser())
        .then(word_parser().repeated())
        .then(annotations)
        .map_with_span(
            |(((((name, generics), params), return_type), words), annotations),
             span: Range<usize>| MethodSyntax {
                name,
                generics: generics.unwrap_or_default(),
                params,
                return_type,
                words,
                annotations,
                body: None,
                span: span.into(),
            },
        )
        .then(body)
        .map(|(mut method, body)| {
            method.body = body;
            Member::Method(method)
        })
        .boxed();

    choice((field, property, method))
}

fn file_parser() -> impl Parser<TokenKind, Vec<Item>, Error = Simple<TokenKind>> {
    let annotations = annotation_parser().repeated();

    let module = just(TokenKind::Module)
        .ignore_then(identifier_parser())
        .then(annotations.clone())
        .map_with_span(|(name, annotations), span: Range<usize>| Item::Module {
            name,
            annotations,
            span: span.into(),
        })
        .then_ignore(newline_parser());

    let assembly = just(TokenKind::Assembly)
        .ignore_then(identifier_parser())
        .then(annotations.clone())
        .map_with_span(|(name, annotations), span: Range<usize>| Item::Assembly {
            name,
            annotations,
            span: span.into(),
        })
        .then_ignore(newline_parser());

    let reference = just(TokenKind::Reference)
        .ignore_then(identifier_parser())
        .map_with_span(|name, span: Range<usize>| Item::Reference {
            name,
            span: span.into(),
        })
        .then_ignore(newline_parser());

    let type_decl = just(TokenKind::Type)
        .ignore_then(identifier_parser())
        .then(
            just(TokenKind::Extends)
                .ignore_then(identifier_parser())
                .or_not(),
        )
        .then(word_parser().repeated())
        .then(annotations)
        .map_with_span(
            |(((name, base), words), annotations), span: Range<usize>| TypeSyntax {
                name,
                base,
                words,
                annotations,
                members: Vec::new(),
                span: span.into(),
            },
        )
        .then(
            indented(member_parser())
                .or(newline_parser().map(|()| Vec::new())),
        )
        .map(|(mut ty, members)| {
            ty.members = members;
            Item::Type(ty)
        });

    choice((module, assembly, reference, type_decl))
        .repeated()
        .then_ignore(just(TokenKind::Eof))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Vec<Item> {
        let tokens = tokenize(source).expect("tokenize should succeed");
        parse(&tokens).expect("parse should succeed")
    }

    #[test]
    fn parses_header_items() {
        let items = parse_source("module Sample @Cache\nassembly Sample.Asm\nreference Cache\n");
        assert_eq!(items.len(), 3);
        match &items[0] {
            Item::Module { name, annotations, .. } => {
                assert_eq!(name, "Sample");
                assert_eq!(annotations[0].name, "Cache");
            }
            other => panic!("expected module item, got {other:?}"),
        }
        assert!(matches!(&items[2], Item::Reference { name, .. } if name == "Cache"));
    }

    #[test]
    fn parses_method_with_labels_and_operands() {
        let source = "\
type Sample.Calc @Cache(duration: 60, eviction: sliding):
    method Get<T>(id: i32) -> T static:
        locals total: i32
        ldarg 0
        brfalse done
        call Cache.ICacheProvider::Retrieve/1<T>
        ret
        done:
        ldc.r8 -2.5
        ret
";
        let items = parse_source(source);
        let Item::Type(ty) = &items[0] else {
            panic!("expected type item, got {:?}", items[0]);
        };
        assert_eq!(ty.annotations[0].arg("duration"), Some(&Literal::Int(60)));
        assert_eq!(
            ty.annotations[0].arg("eviction"),
            Some(&Literal::Ident("sliding".into()))
        );

        let Member::Method(method) = &ty.members[0] else {
            panic!("expected method member");
        };
        assert_eq!(method.generics, vec!["T".to_string()]);
        assert_eq!(method.words[0].text, "static");
        let body = method.body.as_ref().expect("method has a body");
        assert_eq!(body.len(), 8);
        assert!(matches!(&body[5], BodyLine::Label(word) if word.text == "done"));
        match &body[3] {
            BodyLine::Instruction { operands, .. } => match &operands[0].0 {
                Operand::Member { arity, generic_args, .. } => {
                    assert_eq!(*arity, Some(1));
                    assert_eq!(generic_args[0].name, "T");
                }
                other => panic!("expected member operand, got {other:?}"),
            },
            other => panic!("expected instruction, got {other:?}"),
        }
    }

    #[test]
    fn bodyless_members_and_empty_types() {
        let source = "\
type Sample.Empty
type Cache.ICacheProvider interface:
    method Contains(key: string) -> bool abstract
    property Name: string get get_Name
    field hits: i32 static
";
        let items = parse_source(source);
        assert_eq!(items.len(), 2);
        let Item::Type(provider) = &items[1] else {
            panic!("expected type item");
        };
        assert_eq!(provider.members.len(), 3);
        assert!(matches!(&provider.members[0], Member::Method(m) if m.body.is_none()));
    }

    #[test]
    fn reports_unexpected_tokens() {
        let tokens = tokenize("type A:\n    method f( -> void\n").expect("tokenize");
        let errors = parse(&tokens).expect_err("parse should fail");
        assert!(errors[0].message.starts_with("unexpected"));
    }
}
