use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_till1, take_while, take_while1, take_while_m_n},
    character::{
        complete::{char, space0, space1},
        is_alphabetic, is_digit,
    },
    combinator::{opt, peek, rest},
    multi::many0,
    sequence::{preceded, terminated},
    IResult,
};

use crate::{Command, Message, Parameters};

fn is_space(c: u8) -> bool {
    c == b' '
}

// tags ::= '@' <anything but space>
fn parse_tags(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(tag(b"@"), take_till1(is_space))(buf)
}

// source ::= ':' <anything but space>
fn parse_source(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(tag(b":"), take_till1(is_space))(buf)
}

// command ::= letter* / 3digit
fn parse_command(buf: &[u8]) -> IResult<&[u8], &Command> {
    let letters = take_while1(is_alphabetic);
    let digits = take_while_m_n(3, 3, is_digit);

    let (buf, command) = alt((letters, digits))(buf)?;
    Ok((buf, command))
}

fn parse_parameters(mut buf: &[u8]) -> IResult<&[u8], Parameters<'_>> {
    let mut params: Parameters<'_> = smallvec::smallvec!();
    loop {
        let (buf_, _spaces) = take_while(is_space)(buf)?;
        buf = buf_;

        if buf.is_empty() {
            break;
        }

        buf = if peek(tag::<_, _, nom::error::Error<&[u8]>>(b":"))(buf).is_ok() {
            let (buf_, trailing) = preceded(tag(b":"), rest)(buf)?;
            params.push(trailing);
            buf_
        } else {
            let (buf_, param) = take_till(is_space)(buf)?;
            params.push(param);
            buf_
        }
    }

    Ok((buf, params))
}

// message ::= ['@' <tags> SPACE] [':' <source> SPACE] <command> <parameters>
pub fn parse_message(buf: &[u8]) -> IResult<&[u8], Message<'_>> {
    let (buf, _) = space0(buf)?;
    let (buf, tags) = opt(terminated(parse_tags, space1))(buf)?;
    let (buf, source) = opt(terminated(parse_source, space1))(buf)?;
    let (buf, command) = parse_command(buf)?;
    let (buf, parameters) = preceded(many0(char(' ')), parse_parameters)(buf)?;
    Ok((
        buf,
        Message {
            tags,
            source,
            command,
            parameters,
        },
    ))
}
