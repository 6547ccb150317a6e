//! SQL front end: lexer, statement types, and the token parser.
//!
//! The engine itself consumes [`Statement`] values; text only enters here.

mod ast;
mod lexer;

pub use ast::{ColumnDef, ColumnType, CompareOp, Condition, Literal, Statement};
pub use lexer::{lexer, Kw, Token};

use chumsky::prelude::*;

/// Parse a string of semicolon-terminated statements
pub fn parse(input: &str) -> Result<Vec<Statement>, String> {
    let tokens = lexer()
        .parse(input)
        .into_result()
        .map_err(|errs| format!("lex error: {:?}", errs))?;

    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Comment(_)))
        .collect();

    parser()
        .parse(tokens.as_slice())
        .into_result()
        .map_err(|errs| format!("parse error: {:?}", errs))
}

enum TableElement {
    Col(ColumnDef),
    Pkey(String),
}

pub fn parser<'a>()
-> impl Parser<'a, &'a [Token<'a>], Vec<Statement>, extra::Err<Rich<'a, Token<'a>>>> {
    fn kw<'a>(k: Kw) -> impl Parser<'a, &'a [Token<'a>], (), extra::Err<Rich<'a, Token<'a>>>> + Clone
    {
        just(Token::Keyword(k)).ignored()
    }

    fn sym<'a>(c: char) -> impl Parser<'a, &'a [Token<'a>], (), extra::Err<Rich<'a, Token<'a>>>> + Clone
    {
        just(Token::Sym(c)).ignored()
    }

    fn ident<'a>() -> impl Parser<'a, &'a [Token<'a>], String, extra::Err<Rich<'a, Token<'a>>>> + Clone
    {
        select! { Token::Ident(name) => name.to_string() }
    }

    fn literal<'a>() -> impl Parser<'a, &'a [Token<'a>], Literal, extra::Err<Rich<'a, Token<'a>>>> + Clone
    {
        select! {
            Token::Int(i) => Literal::Int(i),
            Token::Float(f) => Literal::Float(f),
            Token::Str(s) => Literal::Str(s.to_string()),
        }
    }

    fn compare_op<'a>()
    -> impl Parser<'a, &'a [Token<'a>], CompareOp, extra::Err<Rich<'a, Token<'a>>>> + Clone {
        choice((
            sym('<').then(sym('>')).to(CompareOp::Ne),
            sym('!').then(sym('=')).to(CompareOp::Ne),
            sym('<').then(sym('=')).to(CompareOp::Le),
            sym('>').then(sym('=')).to(CompareOp::Ge),
            sym('<').to(CompareOp::Lt),
            sym('>').to(CompareOp::Gt),
            sym('=').to(CompareOp::Eq),
        ))
    }

    // WHERE cond (AND cond)*, absent clause parses as the empty conjunction
    fn conditions<'a>()
    -> impl Parser<'a, &'a [Token<'a>], Vec<Condition>, extra::Err<Rich<'a, Token<'a>>>> + Clone {
        let cond = ident()
            .then(compare_op())
            .then(literal())
            .map(|((column, op), value)| Condition { column, op, value });

        kw(Kw::Where)
            .ignore_then(cond.separated_by(kw(Kw::And)).at_least(1).collect())
            .or_not()
            .map(|wheres: Option<Vec<Condition>>| wheres.unwrap_or_default())
    }

    let create_database = kw(Kw::Create)
        .ignore_then(kw(Kw::Database))
        .ignore_then(ident())
        .map(Statement::CreateDatabase);

    let drop_database = kw(Kw::Drop)
        .ignore_then(kw(Kw::Database))
        .ignore_then(ident())
        .map(Statement::DropDatabase);

    let use_db = kw(Kw::Use).ignore_then(ident()).map(Statement::Use);

    let column_type = choice((
        kw(Kw::Int).to(ColumnType::Int),
        kw(Kw::Float).to(ColumnType::Float),
        kw(Kw::Char)
            .ignore_then(
                select! { Token::Int(n) => n }.delimited_by(sym('('), sym(')')),
            )
            .map(|n| ColumnType::Char(n as usize)),
    ));

    let column_def = ident()
        .then(column_type)
        .then(kw(Kw::Primary).then(kw(Kw::Key)).or_not())
        .map(|((name, column_type), pk)| {
            TableElement::Col(ColumnDef {
                name,
                column_type,
                primary_key: pk.is_some(),
            })
        });

    let pkey_def = kw(Kw::Primary)
        .ignore_then(kw(Kw::Key))
        .ignore_then(ident().delimited_by(sym('('), sym(')')))
        .map(TableElement::Pkey);

    let create_table = kw(Kw::Create)
        .ignore_then(kw(Kw::Table))
        .ignore_then(ident())
        .then(
            choice((pkey_def, column_def))
                .separated_by(sym(','))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(sym('('), sym(')')),
        )
        .map(|(table, elements)| {
            let mut columns = Vec::new();
            let mut pkey = None;
            for element in elements {
                match element {
                    TableElement::Col(c) => columns.push(c),
                    TableElement::Pkey(name) => pkey = Some(name),
                }
            }
            if let Some(name) = pkey {
                for c in &mut columns {
                    if c.name == name {
                        c.primary_key = true;
                    }
                }
            }
            Statement::CreateTable { table, columns }
        });

    let drop_table = kw(Kw::Drop)
        .ignore_then(kw(Kw::Table))
        .ignore_then(ident())
        .map(Statement::DropTable);

    let create_index = kw(Kw::Create)
        .ignore_then(kw(Kw::Index))
        .ignore_then(ident())
        .then_ignore(kw(Kw::On))
        .then(ident())
        .then(ident().delimited_by(sym('('), sym(')')))
        .map(|((name, table), column)| Statement::CreateIndex {
            name,
            table,
            column,
        });

    let drop_index = kw(Kw::Drop)
        .ignore_then(kw(Kw::Index))
        .ignore_then(ident())
        .map(Statement::DropIndex);

    let insert = kw(Kw::Insert)
        .ignore_then(kw(Kw::Into))
        .ignore_then(ident())
        .then(
            kw(Kw::Values).ignore_then(
                literal()
                    .separated_by(sym(','))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(sym('('), sym(')')),
            ),
        )
        .map(|(table, values)| Statement::Insert { table, values });

    let select = kw(Kw::Select)
        .ignore_then(sym('*'))
        .ignore_then(kw(Kw::From))
        .ignore_then(ident())
        .then(conditions())
        .map(|(table, wheres)| Statement::Select { table, wheres });

    let delete = kw(Kw::Delete)
        .ignore_then(kw(Kw::From))
        .ignore_then(ident())
        .then(conditions())
        .map(|(table, wheres)| Statement::Delete { table, wheres });

    let assignment = ident().then_ignore(sym('=')).then(literal());

    let update = kw(Kw::Update)
        .ignore_then(ident())
        .then(
            kw(Kw::Set).ignore_then(
                assignment
                    .separated_by(sym(','))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            ),
        )
        .then(conditions())
        .map(|((table, assignments), wheres)| Statement::Update {
            table,
            assignments,
            wheres,
        });

    let exec = kw(Kw::Exec)
        .ignore_then(select! {
            Token::Str(path) => path.to_string(),
            Token::Ident(path) => path.to_string(),
        })
        .map(Statement::Exec);

    let quit = kw(Kw::Quit).to(Statement::Quit);

    choice((
        create_database,
        drop_database,
        use_db,
        create_table,
        drop_table,
        create_index,
        drop_index,
        insert,
        select,
        delete,
        update,
        exec,
        quit,
    ))
    .then_ignore(sym(';'))
    .repeated()
    .collect()
    .then_ignore(end())
}
