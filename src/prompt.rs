use async_trait::async_trait;

use crate::error::Error;
use crate::ops::webauthn::CredentialInfo;

/// User-interaction surface for registration ceremonies. The engine owns no
/// UI; hosts implement this against their shell.
///
/// `prompt_touch` is invoked exactly once per expected physical touch, in
/// the order the touches are required. `prompt_pin` blocks the ceremony;
/// implementations may cancel the surrounding [`CancelSignal`] before
/// returning (e.g. the user dismissed the PIN dialog).
///
/// [`CancelSignal`]: crate::ceremony::CancelSignal
#[async_trait]
pub trait RegisterPrompt: Send + Sync {
    async fn prompt_touch(&self) -> Result<(), Error>;

    /// An empty string means "no PIN provided".
    async fn prompt_pin(&self) -> Result<String, Error>;
}

/// User-interaction surface for login ceremonies: registration prompts plus
/// the resident-credential picker.
#[async_trait]
pub trait LoginPrompt: RegisterPrompt {
    /// Invoked when more than one resident credential is eligible after user
    /// verification.
    async fn prompt_credential(&self, credentials: &[CredentialInfo])
        -> Result<CredentialInfo, Error>;
}

/// Terminal prompt for command-line hosts.
pub struct StdinPrompt;

#[async_trait]
impl RegisterPrompt for StdinPrompt {
    async fn prompt_touch(&self) -> Result<(), Error> {
        println!("Tap your security key");
        Ok(())
    }

    async fn prompt_pin(&self) -> Result<String, Error> {
        use std::io::{self, BufRead, Write};

        print!("Enter the PIN for your security key: ");
        io::stdout()
            .flush()
            .map_err(|err| Error::Internal(err.to_string()))?;
        let mut pin = String::new();
        io::stdin()
            .lock()
            .read_line(&mut pin)
            .map_err(|err| Error::Internal(err.to_string()))?;
        Ok(pin.trim_end_matches(['\r', '\n']).to_owned())
    }
}

#[async_trait]
impl LoginPrompt for StdinPrompt {
    async fn prompt_credential(
        &self,
        credentials: &[CredentialInfo],
    ) -> Result<CredentialInfo, Error> {
        use std::io::{self, BufRead, Write};

        println!("Choose the user for this login:");
        for (i, cred) in credentials.iter().enumerate() {
            println!("  [{}] {}", i + 1, cred.user.name);
        }
        loop {
            print!("> ");
            io::stdout()
                .flush()
                .map_err(|err| Error::Internal(err.to_string()))?;
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|err| Error::Internal(err.to_string()))?;
            if let Ok(choice) = line.trim().parse::<usize>() {
                if (1..=credentials.len()).contains(&choice) {
                    return Ok(credentials[choice - 1].clone());
                }
            }
            println!("Invalid choice, try again.");
        }
    }
}
