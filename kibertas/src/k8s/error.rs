use kube::config::KubeconfigError;

#[derive(thiserror::Error, Debug)]
pub enum K8sError {
    #[error("the kube client returned an error: `{0}`")]
    Generic(kube::Error),

    #[error("the api-server answered with status {code}: `{message}`")]
    Api { code: u16, message: String },

    #[error("it is not possible to read kubeconfig: `{0}`")]
    UnableToSetupClientKubeconfig(#[from] KubeconfigError),

    #[error("missing resource definition: api_version: {0}, kind: {1}")]
    MissingAPIResource(String, String),

    #[error("the kind of the object is missing")]
    MissingKind(),

    #[error("the name of the object is missing")]
    MissingName(),

    #[error("error parsing GroupVersion: `{0}`")]
    ParseGroupVersion(#[from] kube::core::gvk::ParseGroupVersionError),

    #[error("cannot convert the object into a dynamic object: `{0}`")]
    Conversion(#[from] serde_json::Error),
}

impl From<kube::Error> for K8sError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => K8sError::Api {
                code: ae.code,
                message: ae.message.to_string(),
            },
            err => K8sError::Generic(err),
        }
    }
}

impl K8sError {
    /// HTTP status code returned by the api-server, if the error comes from it.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            K8sError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Authentication and authorization errors do not fix themselves by retrying.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status_code(), Some(401) | Some(403))
    }
}
