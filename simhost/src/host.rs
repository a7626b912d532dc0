//! Scripted stand-in for a George host

use georgews_core::host::{ExecutionFailure, Host};
use log::*;

const PRODUCT: &str = "George Simulator";
const VERSION: &str = "12.0";

/// Answers a handful of George commands from in-memory state
pub struct SimHost {
    name: String,
    width: u32,
    height: u32,
    ticking: bool,
}

impl SimHost {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            name: "Untitled".to_string(),
            width,
            height,
            ticking: false,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }
}

impl Host for SimHost {
    fn execute(&mut self, command: &str) -> Result<String, ExecutionFailure> {
        let command = command.trim();
        let (verb, args) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(verb, args)| (verb, args.trim()));

        match verb.to_ascii_lowercase().as_str() {
            "tv_version" => Ok(format!("\"{}\" {} en", PRODUCT, VERSION)),
            "tv_getwidth" => Ok(self.width.to_string()),
            "tv_getheight" => Ok(self.height.to_string()),
            "tv_getname" => Ok(self.name.clone()),
            "tv_setname" => {
                if args.is_empty() {
                    return Err(ExecutionFailure::new("tv_setname needs a name"));
                }
                self.name = args.trim_matches('"').to_string();
                Ok(String::new())
            }
            "tv_warn" => {
                warn!("Host warning: {}", args);
                Ok(String::new())
            }
            _ => Err(ExecutionFailure::new(format!("unknown command {}", verb))),
        }
    }

    fn ensure_ticking(&mut self) -> anyhow::Result<()> {
        self.ticking = true;
        info!("Tick timer enabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries() {
        let mut host = SimHost::new(640, 480);
        assert_eq!(host.execute("tv_getwidth").unwrap(), "640");
        assert_eq!(host.execute("TV_GetHeight").unwrap(), "480");
        assert_eq!(
            host.execute("tv_version").unwrap(),
            "\"George Simulator\" 12.0 en"
        );
    }

    #[test]
    fn set_then_get_name() {
        let mut host = SimHost::new(1, 1);
        assert_eq!(host.execute(r#"tv_setname "My clip""#).unwrap(), "");
        assert_eq!(host.execute("tv_getname").unwrap(), "My clip");
        assert!(host.execute("tv_setname").is_err());
    }

    #[test]
    fn unknown_command_fails() {
        let mut host = SimHost::new(1, 1);
        assert_eq!(
            host.execute("tv_explode now"),
            Err(ExecutionFailure::new("unknown command tv_explode"))
        );
    }

    #[test]
    fn ticking() {
        let mut host = SimHost::new(1, 1);
        assert!(!host.is_ticking());
        host.ensure_ticking().unwrap();
        assert!(host.is_ticking());
    }
}
