//! Terminal style roles
//!
//! Each logical role used by CLI output maps to an optional `colored::Color`.
//! Painting only happens when the caller passes `enabled = true`.
//!
//! ```
//! use routemq::core::styles::StyleRole;
//! assert_eq!(StyleRole::Header.paint("Queues", false), "Queues");
//! ```

use clap::builder::styling::{AnsiColor, Color as ClapColor, Style, Styles};
use colored::{Color, Colorize};

macro_rules! style {
    ( $( $variant:ident => $color:expr ),+ $(,)? ) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub enum StyleRole { $( $variant ),+ }

        impl StyleRole {
            pub fn color(self) -> Option<Color> {
                match self { $( StyleRole::$variant => $color ),+ }
            }
        }
    }
}

style! {
    Header  => Some(Color::Yellow),
    Name    => Some(Color::Cyan),
    Count   => None,
    Healthy => Some(Color::Green),
    Warning => Some(Color::Yellow),
    Error   => Some(Color::BrightRed),
    Dim     => Some(Color::BrightBlack),
}

impl StyleRole {
    pub fn paint(self, text: &str, enabled: bool) -> String {
        match (enabled, self.color()) {
            (true, Some(color)) => text.color(color).to_string(),
            _ => text.to_string(),
        }
    }

    /// prettytable `style_spec` for this role, e.g. `Fy`
    pub fn table_spec(self, enabled: bool) -> String {
        let foreground = match self.color().filter(|_| enabled) {
            Some(Color::Black) => "Fk",
            Some(Color::Red) => "Fr",
            Some(Color::Green) => "Fg",
            Some(Color::Yellow) => "Fy",
            Some(Color::Blue) => "Fb",
            Some(Color::Magenta) => "Fm",
            Some(Color::Cyan) => "Fc",
            Some(Color::White) => "Fw",
            Some(Color::BrightBlack) => "FK",
            Some(Color::BrightRed) => "FR",
            Some(Color::BrightGreen) => "FG",
            Some(Color::BrightYellow) => "FY",
            _ => "",
        };
        foreground.to_string()
    }
}

fn ansi(color: Color) -> Option<AnsiColor> {
    Some(match color {
        Color::Yellow => AnsiColor::Yellow,
        Color::Cyan => AnsiColor::Cyan,
        Color::Green => AnsiColor::Green,
        Color::BrightRed => AnsiColor::BrightRed,
        Color::BrightBlack => AnsiColor::BrightBlack,
        _ => return None,
    })
}

/// clap help styles built from the same roles
pub fn clap_styles(enabled: bool) -> Styles {
    if !enabled {
        return Styles::plain();
    }
    let style = |role: StyleRole, bold: bool| {
        let mut s = Style::new();
        if let Some(color) = role.color().and_then(ansi) {
            s = s.fg_color(Some(ClapColor::Ansi(color)));
        }
        if bold {
            s = s.bold();
        }
        s
    };

    Styles::styled()
        .header(style(StyleRole::Header, true))
        .usage(style(StyleRole::Header, true))
        .literal(style(StyleRole::Name, false))
        .placeholder(style(StyleRole::Healthy, false))
        .error(style(StyleRole::Error, true))
        .invalid(style(StyleRole::Warning, false))
}
