/// Operator commands, independent of the input surface that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Bind,
    Arm,
    Stop,
    Fly,
    Capture,
    Quit,
    Help,
}

/// State-machine transitions an operator command can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Bind,
    Arm,
    StartFlying,
    StopFlying,
}

impl OperatorCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'b' => Some(Self::Bind),
            'a' => Some(Self::Arm),
            'd' | 's' => Some(Self::Stop),
            'f' => Some(Self::Fly),
            'c' => Some(Self::Capture),
            'q' => Some(Self::Quit),
            'h' | '?' => Some(Self::Help),
            _ => None,
        }
    }

    /// `None` for commands the input surface handles itself.
    pub fn transition(self) -> Option<Transition> {
        match self {
            Self::Bind => Some(Transition::Bind),
            Self::Arm => Some(Transition::Arm),
            Self::Stop => Some(Transition::StopFlying),
            Self::Fly => Some(Transition::StartFlying),
            Self::Capture | Self::Quit | Self::Help => None,
        }
    }
}

pub const HELP: &str = "\
b    -- bind the quadcopter
a    -- arm the quadcopter for flight
d, s -- disarm and stop flying
f    -- fly!
c    -- capture images
q    -- quit
h, ? -- this help";
