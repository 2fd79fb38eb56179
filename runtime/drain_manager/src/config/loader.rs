use std::path::PathBuf;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;

use super::DrainConfig;

static PROFILE_ENV_VAR: &str = "DRAIN_PROFILE";
static ENV_PREFIX: &str = "DRAIN_";

#[derive(Clone, Debug, Default)]
/// A utility to load hierarchical configuration for the drain manager.
///
/// Check out [`ConfigLoader::load`] for more information.
///
/// # Example
///
/// ```rust,no_run
/// use drain_manager::config::{ConfigLoader, DrainConfig};
///
/// # fn main() -> anyhow::Result<()> {
/// let config: DrainConfig = ConfigLoader::new()
///     .configuration_dir("configuration")
///     .profile("prod")
///     .load_drain_config()?;
/// # Ok(())
/// # }
/// ```
pub struct ConfigLoader {
    configuration_dir: Option<PathBuf>,
    profile: Option<String>,
}

impl ConfigLoader {
    /// Initialize a new [`ConfigLoader`] instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify the configuration profile manually, rather than loading it
    /// from the `DRAIN_PROFILE` environment variable.
    pub fn profile<P>(mut self, profile: P) -> Self
    where
        P: Into<String>,
    {
        self.profile = Some(profile.into());
        self
    }

    /// Specify the path to the directory where configuration files are stored.
    ///
    /// Relative paths are resolved against the current working directory.
    ///
    /// # Default value
    ///
    /// By default, configuration files are looked up under `configuration/`.
    pub fn configuration_dir<Dir>(mut self, dir: Dir) -> Self
    where
        Dir: Into<PathBuf>,
    {
        self.configuration_dir = Some(dir.into());
        self
    }

    /// Load the configuration by merging together three sources:
    ///
    /// 1. Environment variables (`DRAIN_*`, using `__` to separate nested keys)
    /// 2. Profile-specific configuration file (`{configuration_dir}/{profile}.yml`)
    /// 3. Base configuration file (`{configuration_dir}/base.yml`)
    ///
    /// The list above is ordered by precedence: environment variables take precedence
    /// over the profile-specific file, which in turn takes precedence over the base file.
    ///
    /// Missing files are skipped.
    /// If no profile has been specified and `DRAIN_PROFILE` isn't set, only the base
    /// file and the environment are used.
    pub fn load<Config>(self) -> Result<Config, errors::ConfigLoadError>
    where
        Config: DeserializeOwned,
    {
        let profile = match self.profile {
            Some(profile) => Some(profile),
            None => std::env::var(PROFILE_ENV_VAR).ok(),
        };
        let configuration_dir = self
            .configuration_dir
            .unwrap_or_else(|| PathBuf::from("configuration"));
        let span = tracing::info_span!(
            "Loading drain configuration",
            configuration.directory = %configuration_dir.display(),
            configuration.profile = profile.as_deref().unwrap_or("<none>"),
        );
        let _guard = span.enter();

        let mut figment = Figment::new().merge(Yaml::file(configuration_dir.join("base.yml")));
        if let Some(profile) = &profile {
            figment = figment.merge(Yaml::file(
                configuration_dir.join(format!("{profile}.yml")),
            ));
        }
        let env_source = Env::prefixed(ENV_PREFIX)
            .split("__")
            // `DRAIN_PROFILE` selects a file, it isn't a configuration value.
            .ignore(&["PROFILE"]);
        let configuration: Config = figment
            .merge(env_source)
            .extract()
            .context("Failed to load hierarchical drain configuration")
            .map_err(errors::ConfigLoadError)?;
        Ok(configuration)
    }

    /// Load a [`DrainConfig`], following the same rules as [`ConfigLoader::load`],
    /// and check it with [`DrainConfig::validate`].
    ///
    /// A configuration returned by this method is always accepted by
    /// [`DrainManager::new`](crate::DrainManager::new).
    pub fn load_drain_config(self) -> Result<DrainConfig, errors::ConfigLoadError> {
        let configuration: DrainConfig = self.load()?;
        configuration
            .validate()
            .context("The drain configuration is invalid")
            .map_err(errors::ConfigLoadError)?;
        Ok(configuration)
    }
}

/// Errors that can occur when loading or validating configuration.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("Failed to load configuration")]
    /// The error returned by [`ConfigLoader::load`](super::ConfigLoader::load).
    pub struct ConfigLoadError(#[source] pub(super) anyhow::Error);

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`DrainConfig::validate`](crate::config::DrainConfig::validate).
    pub enum InvalidDrainConfig {
        #[error("The drain tick interval must be greater than zero")]
        ZeroTickInterval,
        #[error("`{field}` must not be longer than {max:?}")]
        DurationTooLong {
            /// The offending configuration field.
            field: &'static str,
            /// The longest accepted duration.
            max: std::time::Duration,
        },
    }
}
