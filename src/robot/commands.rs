//! Closed command tables and parameter validation
//!
//! Every symbolic name maps to exactly one protocol code. Parsing happens
//! before anything touches a process or the control channel.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

macro_rules! command_table {
    (
        $(#[$meta:meta])*
        $name:ident, $domain:literal {
            $($variant:ident => ($key:literal, $code:expr)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Protocol code understood by the robot
            pub fn code(self) -> i32 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $key),+
                }
            }

            pub fn from_code(code: i32) -> Option<Self> {
                Self::ALL.iter().copied().find(|c| c.code() == code)
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim() {
                    $($key => Ok($name::$variant),)+
                    other => Err(AppError::Validation(format!(
                        "unknown {} command {:?}; expected one of: {}",
                        $domain,
                        other,
                        Self::ALL.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} ({})", self.name(), self.code())
            }
        }
    };
}

command_table! {
    /// Locomotion FSM states (`SetFsmId`)
    PostureCommand, "posture" {
        ZeroTorque => ("zero_torque", 0),
        Damp => ("damp", 1),
        Squat => ("squat", 2),
        Sit => ("sit", 3),
        StandUp => ("stand_up", 4),
        Start => ("start", 200),
        LieToStand => ("lie_to_stand", 702),
        SquatToStand => ("squat_to_stand", 706),
    }
}

command_table! {
    /// Balance modes (`SetBalanceMode`)
    BalanceMode, "balance" {
        BalanceStand => ("balance_stand", 0),
        ContinuousGait => ("continuous_gait", 1),
    }
}

command_table! {
    /// Preset arm gestures understood by the arm executable
    ArmAction, "arm" {
        ReleaseArm => ("release_arm", 99),
        TwoHandKiss => ("two_hand_kiss", 11),
        LeftKiss => ("left_kiss", 12),
        RightKiss => ("right_kiss", 13),
        HandsUp => ("hands_up", 15),
        Clap => ("clap", 17),
        HighFive => ("high_five", 18),
        Hug => ("hug", 19),
        Heart => ("heart", 20),
        RightHeart => ("right_heart", 21),
        Reject => ("reject", 22),
        RightHandUp => ("right_hand_up", 23),
        XRay => ("x_ray", 24),
        FaceWave => ("face_wave", 25),
        HighWave => ("high_wave", 26),
        ShakeHand => ("shake_hand", 27),
    }
}

impl ArmAction {
    /// Accepts either a symbolic name or a known numeric code
    pub fn parse_id(id: &str) -> Result<Self> {
        let id = id.trim();
        match id.parse::<i32>() {
            Ok(code) => Self::from_code(code)
                .ok_or_else(|| AppError::Validation(format!("unknown arm action code {}", code))),
            Err(_) => id.parse(),
        }
    }
}

/// Joystick-style locomotion input, validated and clamped to [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WalkCommand {
    pub lx: f32,
    pub ly: f32,
    pub rx: f32,
    pub ry: f32,
}

impl WalkCommand {
    pub fn new(lx: f32, ly: f32, rx: f32, ry: f32) -> Result<Self> {
        let axis = |name: &str, value: f32| {
            if value.is_finite() {
                Ok(value.clamp(-1.0, 1.0))
            } else {
                Err(AppError::Validation(format!("axis {} must be finite, got {}", name, value)))
            }
        };
        Ok(Self {
            lx: axis("lx", lx)?,
            ly: axis("ly", ly)?,
            rx: axis("rx", rx)?,
            ry: axis("ry", ry)?,
        })
    }
}

/// Head LED color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LedColor {
    /// Parse three decimal channel strings (0-255)
    pub fn parse(r: &str, g: &str, b: &str) -> Result<Self> {
        let channel = |name: &str, value: &str| {
            value.trim().parse::<u8>().map_err(|_| {
                AppError::Validation(format!(
                    "LED channel {} must be an integer 0-255, got {:?}",
                    name, value
                ))
            })
        };
        Ok(Self {
            r: channel("r", r)?,
            g: channel("g", g)?,
            b: channel("b", b)?,
        })
    }
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_tables_resolve_names_to_codes() {
        assert_eq!("stand_up".parse::<PostureCommand>().unwrap().code(), 4);
        assert_eq!("squat_to_stand".parse::<PostureCommand>().unwrap().code(), 706);
        assert_eq!("continuous_gait".parse::<BalanceMode>().unwrap().code(), 1);
        assert_eq!(ArmAction::parse_id("hug").unwrap(), ArmAction::Hug);
        assert_eq!(ArmAction::parse_id("27").unwrap(), ArmAction::ShakeHand);
    }

    #[test]
    fn test_unknown_names_are_validation_errors() {
        for bad in ["", "fly", "STAND_UP", "4"] {
            assert!(matches!(bad.parse::<PostureCommand>(), Err(AppError::Validation(_))));
        }
        assert!(matches!(ArmAction::parse_id("moonwalk"), Err(AppError::Validation(_))));
        assert!(matches!(ArmAction::parse_id("14"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_codes_are_unique_per_table() {
        let arm: HashSet<_> = ArmAction::ALL.iter().map(|a| a.code()).collect();
        assert_eq!(arm.len(), ArmAction::ALL.len());
        let posture: HashSet<_> = PostureCommand::ALL.iter().map(|a| a.code()).collect();
        assert_eq!(posture.len(), PostureCommand::ALL.len());
        for action in ArmAction::ALL {
            assert_eq!(action.name().parse::<ArmAction>().unwrap(), *action);
        }
    }

    #[test]
    fn test_walk_clamps_and_rejects_non_finite() {
        let walk = WalkCommand::new(2.5, -0.3, -7.0, 0.0).unwrap();
        assert_eq!(walk, WalkCommand { lx: 1.0, ly: -0.3, rx: -1.0, ry: 0.0 });
        assert!(matches!(
            WalkCommand::new(f32::NAN, 0.0, 0.0, 0.0),
            Err(AppError::Validation(_))
        ));
        assert!(WalkCommand::new(0.0, f32::INFINITY, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_led_color_parse() {
        let color = assert_ok!(LedColor::parse("255", " 0", "0"));
        assert_eq!(color.to_string(), "(255,0,0)");
        assert_err!(LedColor::parse("256", "0", "0"));
        assert_err!(LedColor::parse("-1", "0", "0"));
        assert_err!(LedColor::parse("red", "0", "0"));
    }
}
