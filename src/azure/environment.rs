/// Azure cloud environments and their well-known endpoints
use super::auth::AuthError;

/// Environment selected when `AZURE_ENVIRONMENT` is unset
pub const DEFAULT_ENVIRONMENT: &str = "AzurePublicCloud";

/// Endpoints of one Azure cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: &'static str,
    pub resource_manager_endpoint: &'static str,
    pub resource_manager_vm_dns_suffix: &'static str,
    pub active_directory_endpoint: &'static str,
}

pub const PUBLIC_CLOUD: Environment = Environment {
    name: "AzurePublicCloud",
    resource_manager_endpoint: "https://management.azure.com/",
    resource_manager_vm_dns_suffix: "cloudapp.azure.com",
    active_directory_endpoint: "https://login.microsoftonline.com/",
};

pub const CHINA_CLOUD: Environment = Environment {
    name: "AzureChinaCloud",
    resource_manager_endpoint: "https://management.chinacloudapi.cn/",
    resource_manager_vm_dns_suffix: "cloudapp.chinacloudapi.cn",
    active_directory_endpoint: "https://login.chinacloudapi.cn/",
};

pub const US_GOVERNMENT_CLOUD: Environment = Environment {
    name: "AzureUSGovernmentCloud",
    resource_manager_endpoint: "https://management.usgovcloudapi.net/",
    resource_manager_vm_dns_suffix: "cloudapp.usgovcloudapi.net",
    active_directory_endpoint: "https://login.microsoftonline.us/",
};

pub const GERMAN_CLOUD: Environment = Environment {
    name: "AzureGermanCloud",
    resource_manager_endpoint: "https://management.microsoftazure.de/",
    resource_manager_vm_dns_suffix: "cloudapp.microsoftazure.de",
    active_directory_endpoint: "https://login.microsoftonline.de/",
};

const ENVIRONMENTS: [&Environment; 4] = [
    &PUBLIC_CLOUD,
    &CHINA_CLOUD,
    &US_GOVERNMENT_CLOUD,
    &GERMAN_CLOUD,
];

impl Environment {
    /// Look up an environment by name, case-insensitively
    pub fn from_name(name: &str) -> Result<Self, AuthError> {
        ENVIRONMENTS
            .iter()
            .find(|env| env.name.eq_ignore_ascii_case(name.trim()))
            .map(|env| (*env).clone())
            .ok_or_else(|| AuthError::UnknownEnvironment(name.to_string()))
    }
}

impl Default for Environment {
    fn default() -> Self {
        PUBLIC_CLOUD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_lookup() {
        let env = Environment::from_name("azurechinacloud").unwrap();
        assert_eq!(env.resource_manager_vm_dns_suffix, "cloudapp.chinacloudapi.cn");
        assert_eq!(Environment::default().name, DEFAULT_ENVIRONMENT);
    }

    #[test]
    fn test_unknown_environment() {
        assert!(Environment::from_name("MarsCloud").is_err());
    }
}
