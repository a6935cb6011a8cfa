use iced::{Background, Border, Color, Shadow, Theme};
use iced::widget::button::{StyleSheet, Appearance};

// a list row: flat, highlighted when hovered or when it is the device being synchronised
pub struct DeviceRowStyleSheet {
    pub highlighted: bool,
}

impl DeviceRowStyleSheet {
    fn appearance(&self, background: Option<Color>) -> Appearance {
        Appearance {
            shadow_offset: Default::default(),
            background: background.map(Background::Color),
            text_color: Color::BLACK,
            border: Border {
                color: Color::TRANSPARENT,
                width: 0.0,
                radius: 4.0.into(),
            },
            shadow: Shadow::default(),
        }
    }
}

impl StyleSheet for DeviceRowStyleSheet {
    type Style = Theme;

    fn active(&self, _style: &Self::Style) -> Appearance {
        if self.highlighted {
            self.appearance(Some(Color::from_rgb8(0xD6, 0xEA, 0xF8)))
        } else {
            self.appearance(None)
        }
    }

    fn hovered(&self, _style: &Self::Style) -> Appearance {
        self.appearance(Some(Color::from_rgb8(0xEB, 0xEB, 0xEB)))
    }
}
