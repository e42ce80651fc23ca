use clap::{Parser, ValueEnum};
use dbpf_res::fields::visible_fields;
use dbpf_res::{ApiVersionedFields, CatalogCommon, CatalogResource, Error, JazzGraphResource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResourceKind {
    Catalog,
    Jazz,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_version_flag(true))]
struct Args {
    /// Raw resource file to dump
    path: String,

    /// Wrapper to decode the stream with
    #[arg(short, long, value_enum)]
    kind: ResourceKind,

    /// Requested API version (0 = recommended)
    #[arg(short, long, default_value = "0")]
    api_version: i32,

    /// Tolerate recorded offsets/sizes that disagree with the stream
    #[arg(long, default_value = "false")]
    lenient: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.lenient {
        dbpf_res::set_strict_checking(false);
    }

    let data = std::fs::read(&args.path)?;
    println!("{} ({} bytes)", args.path, data.len());

    match args.kind {
        ResourceKind::Catalog => {
            let res = CatalogResource::from_stream(args.api_version, data)?;
            dump_fields(&res, res.version(), 0);
        }
        ResourceKind::Jazz => {
            let res = JazzGraphResource::from_stream(args.api_version, data)?;
            dump_fields(&res, res.version(), 0);
            for (i, command) in res.commands().iter().enumerate() {
                println!("  command[{i}] = {command:?}");
            }
        }
    }

    Ok(())
}

fn dump_fields<T: ApiVersionedFields + 'static>(node: &T, version: u32, indent: usize) {
    let pad = "  ".repeat(indent + 1);
    for name in visible_fields::<T>(version).iter() {
        match node.get_field(name) {
            Ok(value) => println!("{pad}{name} = {value}"),
            // composite fields are dumped through their nested surface
            Err(Error::InvalidArgument(_)) => {
                println!("{pad}{name}:");
                if name == &"CommonBlock" {
                    if let Some(inner) = node.nested(name) {
                        dump_dyn::<CatalogCommon>(inner, indent + 1);
                    }
                }
            }
            Err(e) => println!("{pad}{name} = <{e}>"),
        }
    }
}

fn dump_dyn<T: ApiVersionedFields + 'static>(node: &dyn ApiVersionedFields, indent: usize) {
    let pad = "  ".repeat(indent + 1);
    for name in visible_fields::<T>(node.version()).iter() {
        match node.get_field(name) {
            Ok(value) => println!("{pad}{name} = {value}"),
            Err(e) => println!("{pad}{name} = <{e}>"),
        }
    }
}
