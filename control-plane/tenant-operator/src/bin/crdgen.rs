use kube::core::CustomResourceExt;
use tenant_operator::crd::{Application, Environment, Site};

fn main() -> anyhow::Result<()> {
    let docs = [
        serde_yaml::to_string(&Application::crd())?,
        serde_yaml::to_string(&Environment::crd())?,
        serde_yaml::to_string(&Site::crd())?,
    ];
    println!("{}", docs.join("---\n"));
    Ok(())
}
