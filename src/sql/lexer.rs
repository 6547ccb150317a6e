use chumsky::{prelude::*, regex::regex, text::ascii::ident};

/// Recognized keywords. Matching is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    Create,
    Drop,
    Database,
    Table,
    Index,
    Use,
    Insert,
    Into,
    Values,
    Select,
    From,
    Where,
    And,
    Delete,
    Update,
    Set,
    On,
    Primary,
    Key,
    Int,
    Float,
    Char,
    Exec,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'a> {
    Keyword(Kw),
    Ident(&'a str),
    Int(i64),
    Float(f64),
    Str(&'a str),
    Sym(char),
    Comment(&'a str),
}

fn classify_word(word: &str) -> Token<'_> {
    let kw = match word.to_ascii_uppercase().as_str() {
        "CREATE" => Kw::Create,
        "DROP" => Kw::Drop,
        "DATABASE" => Kw::Database,
        "TABLE" => Kw::Table,
        "INDEX" => Kw::Index,
        "USE" => Kw::Use,
        "INSERT" => Kw::Insert,
        "INTO" => Kw::Into,
        "VALUES" => Kw::Values,
        "SELECT" => Kw::Select,
        "FROM" => Kw::From,
        "WHERE" => Kw::Where,
        "AND" => Kw::And,
        "DELETE" => Kw::Delete,
        "UPDATE" => Kw::Update,
        "SET" => Kw::Set,
        "ON" => Kw::On,
        "PRIMARY" => Kw::Primary,
        "KEY" => Kw::Key,
        "INT" => Kw::Int,
        "FLOAT" => Kw::Float,
        "CHAR" => Kw::Char,
        "EXEC" => Kw::Exec,
        "QUIT" | "EXIT" => Kw::Quit,
        _ => return Token::Ident(word),
    };
    Token::Keyword(kw)
}

pub fn lexer<'a>() -> impl Parser<'a, &'a str, Vec<Token<'a>>, extra::Err<Rich<'a, char>>> {
    let comment = just("--")
        .ignore_then(none_of("\n").repeated())
        .to_slice()
        .map(|s: &str| Token::Comment(s))
        .padded();

    let float = regex(r"-?\d+\.\d*")
        .map(|s: &str| Token::Float(s.parse().unwrap()))
        .padded();

    let integer = regex(r"-?\d+")
        .map(|s: &str| Token::Int(s.parse().unwrap()))
        .padded();

    let single_quoted = regex(r"'[^']*'")
        .map(|s: &str| Token::Str(&s[1..s.len() - 1]))
        .padded();

    let double_quoted = regex(r#""[^"]*""#)
        .map(|s: &str| Token::Str(&s[1..s.len() - 1]))
        .padded();

    let word = ident().map(classify_word).padded();

    let symbol = one_of("(),;=*<>!.").map(Token::Sym).padded();

    choice((
        comment,
        float,
        integer,
        single_quoted,
        double_quoted,
        word,
        symbol,
    ))
    .repeated()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token<'_>> {
        lexer().parse(input).into_result().unwrap()
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            lex("select SELECT Select"),
            vec![
                Token::Keyword(Kw::Select),
                Token::Keyword(Kw::Select),
                Token::Keyword(Kw::Select),
            ]
        );
    }

    #[test]
    fn test_identifier_not_keyword_prefix() {
        assert_eq!(lex("selector"), vec![Token::Ident("selector")]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("-12 4.5 7"),
            vec![Token::Int(-12), Token::Float(4.5), Token::Int(7)]
        );
    }

    #[test]
    fn test_strings_single_and_double() {
        assert_eq!(
            lex(r#"'alice' "bob""#),
            vec![Token::Str("alice"), Token::Str("bob")]
        );
    }

    #[test]
    fn test_symbols_split_for_two_char_ops() {
        assert_eq!(
            lex("<= <>"),
            vec![
                Token::Sym('<'),
                Token::Sym('='),
                Token::Sym('<'),
                Token::Sym('>'),
            ]
        );
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        let tokens = lex("-- a comment\nquit;");
        assert_eq!(
            tokens,
            vec![
                Token::Comment("-- a comment"),
                Token::Keyword(Kw::Quit),
                Token::Sym(';'),
            ]
        );
    }

    #[test]
    fn test_exit_is_quit() {
        assert_eq!(lex("EXIT"), vec![Token::Keyword(Kw::Quit)]);
    }
}
