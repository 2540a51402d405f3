// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Parsers for device-bridge output
//!
//! Handles the few fields the scheduler needs:
//! - `devices` listing (serial + connection state)
//! - `wm size` resolution lines
//! - `dumpsys window` focus line
//! - `pm list packages` entries

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_till1, take_until},
    character::complete::{char, not_line_ending, space0, space1},
    combinator::{all_consuming, map},
    sequence::{delimited, preceded, separated_pair},
};

use crate::types::Vector2;

const DEVICES_HEADER: &str = "List of devices attached";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub connected: bool,
}

fn parse_device_line(input: &str) -> IResult<&str, DeviceEntry> {
    let (input, serial) = take_till1(|c: char| c.is_whitespace())(input)?;
    let (input, _) = space1(input)?;
    let (input, state) = take_till1(|c: char| c.is_whitespace())(input)?;
    Ok((
        input,
        DeviceEntry {
            serial: serial.to_string(),
            connected: state == "device",
        },
    ))
}

/// Parse the output of `adb devices`.
///
/// Lines before the header (daemon start-up chatter) are ignored, as are
/// lines after it that do not look like `serial<TAB>state`.
pub fn parse_devices(input: &str) -> Vec<DeviceEntry> {
    input
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != DEVICES_HEADER)
        .skip(1)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_device_line(line).ok().map(|(_, entry)| entry))
        .collect()
}

fn parse_dimensions(input: &str) -> IResult<&str, Vector2> {
    map(
        separated_pair(
            nom::character::complete::i32,
            char('x'),
            nom::character::complete::i32,
        ),
        |(x, y)| Vector2::new(x, y),
    )
    .parse(input)
}

fn parse_size_line(input: &str) -> IResult<&str, Vector2> {
    let (input, _) = take_until(":")(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = space0(input)?;
    parse_dimensions(input)
}

/// Parse the first `<label>: <W>x<H>` line, e.g. from `wm size`.
pub fn parse_resolution(input: &str) -> Option<Vector2> {
    input
        .lines()
        .find_map(|line| parse_size_line(line.trim()).ok().map(|(_, size)| size))
}

/// Parse a bare `WxH` argument.
pub fn parse_size_arg(input: &str) -> Result<Vector2, String> {
    all_consuming(parse_dimensions)
        .parse(input.trim())
        .map(|(_, size)| size)
        .map_err(|_| format!("expected WIDTHxHEIGHT, got '{}'", input))
}

/// Find the `mCurrentFocus` line in `dumpsys window` output.
pub fn parse_current_focus(input: &str) -> Option<String> {
    input
        .lines()
        .map(str::trim)
        .find(|line| line.contains("mCurrentFocus"))
        .map(str::to_string)
}

fn parse_window_body(input: &str) -> IResult<&str, &str> {
    preceded(
        take_until("{"),
        delimited(char('{'), take_until("}"), char('}')),
    )
    .parse(input)
}

/// Extract `package/activity` from a focus line such as
/// `mCurrentFocus=Window{1c2d u0 com.example/.MainActivity}`.
pub fn focused_component(line: &str) -> Option<String> {
    let (_, body) = parse_window_body(line).ok()?;
    body.split_whitespace()
        .last()
        .filter(|token| token.contains('/'))
        .map(str::to_string)
}

fn parse_package_line(input: &str) -> IResult<&str, &str> {
    preceded(tag("package:"), not_line_ending).parse(input)
}

/// Parse `pm list packages` output into package names.
pub fn parse_packages(input: &str) -> Vec<String> {
    input
        .lines()
        .filter_map(|line| parse_package_line(line.trim()).ok())
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let input = "* daemon not running; starting now at tcp:5037\r\n\
                     * daemon started successfully\r\n\
                     List of devices attached\r\n\
                     emulator-5554\tdevice\r\n\
                     emulator-5556\toffline\r\n\
                     \r\n";
        let devices = parse_devices(input);
        assert_eq!(
            devices,
            vec![
                DeviceEntry {
                    serial: "emulator-5554".to_string(),
                    connected: true,
                },
                DeviceEntry {
                    serial: "emulator-5556".to_string(),
                    connected: false,
                },
            ]
        );
    }

    #[test]
    fn test_parse_devices_without_header() {
        assert!(parse_devices("emulator-5554\tdevice\n").is_empty());
    }

    #[test]
    fn test_parse_devices_unauthorized() {
        let input = "List of devices attached\nR58M\tunauthorized\n";
        let devices = parse_devices(input);
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].connected);
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(
            parse_resolution("Physical size: 1080x1920\n"),
            Some(Vector2::new(1080, 1920))
        );
    }

    #[test]
    fn test_parse_resolution_prefers_first_line() {
        let input = "Physical size: 1080x1920\r\nOverride size: 720x1280\r\n";
        assert_eq!(parse_resolution(input), Some(Vector2::new(1080, 1920)));
    }

    #[test]
    fn test_parse_resolution_garbage() {
        assert_eq!(parse_resolution("error: no devices/emulators found"), None);
    }

    #[test]
    fn test_parse_size_arg() {
        assert_eq!(parse_size_arg("1280x720"), Ok(Vector2::new(1280, 720)));
        assert!(parse_size_arg("1280x").is_err());
        assert!(parse_size_arg("1280x720x3").is_err());
    }

    #[test]
    fn test_parse_current_focus() {
        let input = "WINDOW MANAGER WINDOWS\r\n  mCurrentFocus=Window{4f2 u0 game.example/com.qk.game.MainActivity}\r\n  mFocusedApp=null\r\n";
        let line = parse_current_focus(input).unwrap();
        assert!(line.starts_with("mCurrentFocus"));
        assert_eq!(
            focused_component(&line).as_deref(),
            Some("game.example/com.qk.game.MainActivity")
        );
    }

    #[test]
    fn test_focused_component_without_activity() {
        assert_eq!(focused_component("mCurrentFocus=Window{4f2 u0 StatusBar}"), None);
        assert_eq!(focused_component("mCurrentFocus=null"), None);
    }

    #[test]
    fn test_parse_packages() {
        let input = "package:com.example.one\r\npackage:com.example.two\r\n\r\n";
        assert_eq!(
            parse_packages(input),
            vec!["com.example.one".to_string(), "com.example.two".to_string()]
        );
    }
}
